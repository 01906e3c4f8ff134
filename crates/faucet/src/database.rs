//! Payout history backed by sled
//!
//! Records are append-only. The engine never updates or deletes them.

use crate::amount;
use crate::error::{FaucetError, FaucetResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sled::{Db, Tree};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};

/// One completed payout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRecord {
    /// Amount sent (atomic units)
    pub amount: u64,
    /// Recipient address
    pub destination_address: String,
    /// Transaction hash(es) reported by the wallet
    pub transaction_id: String,
    /// SHA-256 of the requester identity
    pub requester_hash: String,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl PayoutRecord {
    pub fn new(
        amount: u64,
        destination_address: String,
        transaction_id: String,
        requester_hash: String,
    ) -> Self {
        Self {
            amount,
            destination_address,
            transaction_id,
            requester_hash,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp.timestamp_millis();
        self
    }
}

/// Hex SHA-256 of a client identity. Raw identities are never stored.
pub fn hash_identity(identity: &str) -> String {
    hex::encode(Sha256::digest(identity.as_bytes()))
}

/// Payout database
pub struct PayoutDatabase {
    db: Db,
    /// Records keyed by `address:sequence`
    payouts: Tree,
    /// Latest stored timestamp, keeps timestamps non-decreasing
    last_timestamp: AtomicI64,
}

impl PayoutDatabase {
    /// Create or open payout database
    pub fn new<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        info!("Opening payout database at: {}", path.as_ref().display());

        let db = sled::Config::default()
            .path(path)
            .cache_capacity(64 * 1024 * 1024)
            .open()?;

        Self::from_db(db)
    }

    /// In-memory database, removed on drop
    pub fn temporary() -> FaucetResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> FaucetResult<Self> {
        let payouts = db.open_tree("payouts")?;

        let mut last = i64::MIN;
        for item in payouts.iter() {
            let (_, value) = item?;
            last = last.max(decode(&value)?.timestamp);
        }

        Ok(Self {
            db,
            payouts,
            last_timestamp: AtomicI64::new(last),
        })
    }

    /// Append a payout and return it as stored
    pub fn add_payout(&self, mut record: PayoutRecord) -> FaucetResult<PayoutRecord> {
        if record.transaction_id.is_empty() {
            return Err(FaucetError::Internal(
                "refusing to store a payout without transaction id".to_string(),
            ));
        }

        let previous = self
            .last_timestamp
            .fetch_max(record.timestamp, Ordering::SeqCst);
        record.timestamp = record.timestamp.max(previous);

        let sequence = self.db.generate_id()?;
        let key = format!("{}:{:020}", record.destination_address, sequence);
        let value =
            bincode::serialize(&record).map_err(|e| FaucetError::Internal(e.to_string()))?;

        self.payouts.insert(key, value)?;

        debug!(
            "Recorded payout of {} to address: {}",
            record.amount, record.destination_address
        );

        Ok(record)
    }

    /// Store clock: `now`, or the newest stored timestamp if that is later
    ///
    /// Stored timestamps never decrease, so after a wall clock step back the
    /// newest record can be ahead of `now`.
    pub fn clock(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let last = self.last_timestamp.load(Ordering::SeqCst);
        match DateTime::from_timestamp_millis(last) {
            Some(latest) if latest > now => latest,
            _ => now,
        }
    }

    /// Count payouts to `address` stamped after `start`
    pub fn count_payouts_since(&self, address: &str, start: DateTime<Utc>) -> FaucetResult<usize> {
        let start = start.timestamp_millis();
        let mut count = 0;

        for item in self.payouts.scan_prefix(format!("{}:", address)) {
            let (_, value) = item?;
            if decode(&value)?.timestamp > start {
                count += 1;
            }
        }

        Ok(count)
    }

    /// All payouts for an address, newest first
    pub fn get_payouts_for_address(&self, address: &str) -> FaucetResult<Vec<PayoutRecord>> {
        let mut records = Vec::new();

        for item in self.payouts.scan_prefix(format!("{}:", address)) {
            let (_, value) = item?;
            records.push(decode(&value)?);
        }

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Total number of stored payouts
    pub fn len(&self) -> usize {
        self.payouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payouts.is_empty()
    }

    /// Get statistics
    pub fn get_statistics(&self) -> FaucetResult<PayoutStatistics> {
        let mut total_amount = 0u128;
        let mut unique_addresses = HashSet::new();

        for item in self.payouts.iter() {
            let (_, value) = item?;
            let record = decode(&value)?;

            total_amount += record.amount as u128;
            unique_addresses.insert(record.destination_address);
        }

        Ok(PayoutStatistics {
            total_payouts: self.payouts.len(),
            total_amount: u64::try_from(total_amount)
                .map(amount::to_decimal)
                .unwrap_or(Decimal::MAX),
            unique_addresses: unique_addresses.len() as u64,
        })
    }

    pub fn flush(&self) -> FaucetResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode(bytes: &[u8]) -> FaucetResult<PayoutRecord> {
    bincode::deserialize(bytes).map_err(|e| FaucetError::Internal(e.to_string()))
}

/// Payout statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutStatistics {
    pub total_payouts: usize,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    pub unique_addresses: u64,
}
