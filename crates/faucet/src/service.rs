//! Faucet service core logic
//!
//! A payout request moves through
//! `Validating → QuotaChecking → Calculating → Transferring → Persisting → Completed`
//! and any failure ends it in `Aborted`. No stage is retried.

use crate::address::DestinationAddress;
use crate::amount;
use crate::calculator::PayoutCalculator;
use crate::config::FaucetConfig;
use crate::database::{hash_identity, PayoutDatabase, PayoutRecord};
use crate::error::{FaucetError, FaucetResult};
use crate::guard::AbuseGuard;
use crate::metrics::FaucetMetrics;
use crate::wallet_rpc::{NetworkType, WalletBackend, WalletRpcClient, WalletRpcConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Stage of a payout request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutStage {
    Validating,
    QuotaChecking,
    Calculating,
    Transferring,
    Persisting,
    Completed,
    Aborted,
}

impl PayoutStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStage::Validating => "validating",
            PayoutStage::QuotaChecking => "quota_checking",
            PayoutStage::Calculating => "calculating",
            PayoutStage::Transferring => "transferring",
            PayoutStage::Persisting => "persisting",
            PayoutStage::Completed => "completed",
            PayoutStage::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStage::Completed | PayoutStage::Aborted)
    }
}

impl fmt::Display for PayoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public view of a completed payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutReceipt {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub transaction_id: String,
    pub destination_address: String,
}

impl From<&PayoutRecord> for PayoutReceipt {
    fn from(record: &PayoutRecord) -> Self {
        Self {
            amount: amount::to_decimal(record.amount),
            transaction_id: record.transaction_id.clone(),
            destination_address: record.destination_address.clone(),
        }
    }
}

/// Balance in whole XMR
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub balance: u64,
}

/// Wallet address and network, as shown on the landing page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetInfo {
    pub wallet_address: String,
    pub network: NetworkType,
    /// The other test network, empty on mainnet
    pub network_other: String,
}

/// Faucet status
///
/// Amounts serialize as decimal strings to keep all 12 fractional digits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetStatus {
    pub wallet_address: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub maximum_payout: Decimal,
    pub total_payouts: usize,
    pub unique_addresses: u64,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_dispensed: Decimal,
    pub client_rate_limit_enabled: bool,
}

/// Faucet service
pub struct FaucetService {
    config: FaucetConfig,
    database: Arc<PayoutDatabase>,
    wallet: Arc<dyn WalletBackend>,
    calculator: PayoutCalculator,
    guard: AbuseGuard,
    metrics: FaucetMetrics,
}

impl FaucetService {
    /// Create a service talking to the wallet daemon named in `config`
    pub fn connect(config: FaucetConfig, database: PayoutDatabase) -> FaucetResult<Self> {
        let rpc_config = WalletRpcConfig::from(&config);
        info!("Wallet RPC endpoint: {}", rpc_config.wallet_url);
        let wallet = Arc::new(WalletRpcClient::new(rpc_config)?);
        Self::new(config, database, wallet)
    }

    /// Create new faucet service
    pub fn new(
        config: FaucetConfig,
        database: PayoutDatabase,
        wallet: Arc<dyn WalletBackend>,
    ) -> FaucetResult<Self> {
        config.validate()?;

        let database = Arc::new(database);
        let calculator = PayoutCalculator::new(wallet.clone(), config.maximum_payout_atomic()?);
        let guard = AbuseGuard::from_config(database.clone(), &config)?;
        let metrics = FaucetMetrics::new()?;

        Ok(Self {
            config,
            database,
            wallet,
            calculator,
            guard,
            metrics,
        })
    }

    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    pub fn database(&self) -> &PayoutDatabase {
        &self.database
    }

    pub fn metrics(&self) -> &FaucetMetrics {
        &self.metrics
    }

    /// Drop limiter entries for clients whose period has elapsed
    pub fn prune_client_state(&self) {
        self.guard.prune_client_state();
        debug!("Pruned client limiter state");
    }

    /// Pay out to `destination_address`
    ///
    /// `client_identity` is the requester's IP; only its hash is stored or logged.
    pub async fn request_payout(
        &self,
        destination_address: &str,
        client_identity: Option<&str>,
    ) -> FaucetResult<PayoutReceipt> {
        let requester_hash = client_identity
            .filter(|identity| !identity.is_empty())
            .map(hash_identity);

        let mut attempt = PayoutAttempt::default();
        let result = self
            .run_payout(destination_address, requester_hash, &mut attempt)
            .await;
        let PayoutAttempt { mut stage, amount } = attempt;

        match &result {
            Ok(receipt) => {
                info!(
                    "Paid {} XMR to {}, tx: {}",
                    receipt.amount, receipt.destination_address, receipt.transaction_id
                );
            }
            Err(e) => {
                match e {
                    FaucetError::AddressRateExceeded { .. } => {
                        self.metrics.record_rejection("address")
                    }
                    FaucetError::ClientRateExceeded { .. } => self.metrics.record_rejection("client"),
                    FaucetError::InvalidAddress(_) => self.metrics.record_rejection("validation"),
                    _ => self.metrics.record_failure(stage.as_str()),
                }

                if e.is_client_error() {
                    warn!(stage = stage.as_str(), "Payout rejected: {}", e);
                } else {
                    error!(
                        stage = stage.as_str(),
                        destination = destination_address,
                        amount = ?amount,
                        "Payout aborted: {}",
                        e
                    );
                }
                stage = PayoutStage::Aborted;
            }
        }

        debug!("Payout request finished in stage {}", stage);
        result
    }

    async fn run_payout(
        &self,
        destination_address: &str,
        requester_hash: Option<String>,
        attempt: &mut PayoutAttempt,
    ) -> FaucetResult<PayoutReceipt> {
        let destination = DestinationAddress::parse(destination_address)?;

        attempt.advance(PayoutStage::QuotaChecking);
        self.guard.check_address(&destination)?;
        match &requester_hash {
            Some(hash) => self.guard.check_client(hash)?,
            None if self.guard.client_limit_enabled() => {
                warn!("No client identity for payout to {}; client limit skipped", destination);
            }
            None => {}
        }

        attempt.advance(PayoutStage::Calculating);
        let amount = self
            .calculator
            .compute_amount(self.config.payout_factor)
            .await
            .map_err(|e| FaucetError::PayoutComputationFailed(Box::new(e)))?;
        attempt.amount = Some(amount);

        attempt.advance(PayoutStage::Transferring);
        let transfer = self
            .wallet
            .transfer(&destination, amount)
            .await
            .map_err(|e| FaucetError::PayoutTransferFailed(Box::new(e)))?;
        info!(
            "Transfer of {} to {} confirmed, tx: {}, fee: {}",
            amount, destination, transfer.transaction_id, transfer.fee
        );

        attempt.advance(PayoutStage::Persisting);
        // Funds have moved at this point; a missing identity leaves the payout unrecorded
        let requester_hash = requester_hash.ok_or_else(|| {
            error!(
                "Transfer {} to {} completed but client identity is missing; payout not recorded",
                transfer.transaction_id, destination
            );
            FaucetError::MissingClientIdentity {
                transaction_id: transfer.transaction_id.clone(),
            }
        })?;

        let record = self.database.add_payout(PayoutRecord::new(
            amount,
            destination.to_string(),
            transfer.transaction_id,
            requester_hash,
        ))?;
        self.metrics.record_payout(record.amount);

        attempt.advance(PayoutStage::Completed);
        Ok(PayoutReceipt::from(&record))
    }

    /// Current balance in whole XMR; not subject to any quota
    pub async fn balance(&self) -> FaucetResult<BalanceResponse> {
        let balance = self.wallet.get_balance().await?;
        Ok(BalanceResponse {
            balance: amount::whole_units(balance),
        })
    }

    /// Wallet address and network type
    pub async fn info(&self) -> FaucetResult<FaucetInfo> {
        let network = self.wallet.get_network_type().await?;
        let wallet_address = self.wallet.get_address().await?;

        Ok(FaucetInfo {
            wallet_address,
            network,
            network_other: network
                .counterpart()
                .map(|n| n.to_string())
                .unwrap_or_default(),
        })
    }

    /// Get faucet status
    pub async fn status(&self) -> FaucetResult<FaucetStatus> {
        let balance = self.wallet.get_balance().await?;
        let wallet_address = self.wallet.get_address().await?;
        let stats = self.database.get_statistics()?;

        Ok(FaucetStatus {
            wallet_address,
            balance: amount::to_decimal(balance),
            maximum_payout: amount::to_decimal(self.calculator.max_payout_atomic()),
            total_payouts: stats.total_payouts,
            unique_addresses: stats.unique_addresses,
            total_dispensed: stats.total_amount,
            client_rate_limit_enabled: self.guard.client_limit_enabled(),
        })
    }
}

/// Progress of one payout request
#[derive(Debug)]
struct PayoutAttempt {
    stage: PayoutStage,
    /// Known once the Calculating stage succeeds
    amount: Option<u64>,
}

impl Default for PayoutAttempt {
    fn default() -> Self {
        Self {
            stage: PayoutStage::Validating,
            amount: None,
        }
    }
}

impl PayoutAttempt {
    fn advance(&mut self, next: PayoutStage) {
        debug!("Payout stage {} -> {}", self.stage, next);
        self.stage = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::tests::{INTEGRATED, STANDARD};
    use crate::wallet_rpc::mock::MockWallet;
    use std::sync::atomic::Ordering;

    const BALANCE: u64 = 19_769_691_509_258_199;
    const CLIENT_IP: &str = "203.0.113.7";

    fn test_config() -> FaucetConfig {
        FaucetConfig {
            payout_factor: 6000,
            maximum_payout: Decimal::from(3),
            address_rate_allowed: 2,
            client_rate_limit_enabled: false,
            ..Default::default()
        }
    }

    fn service_with(config: FaucetConfig, wallet: Arc<MockWallet>) -> FaucetService {
        FaucetService::new(config, PayoutDatabase::temporary().unwrap(), wallet).unwrap()
    }

    #[tokio::test]
    async fn test_successful_payout() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let service = service_with(test_config(), wallet.clone());

        let receipt = service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap();

        let expected = 3_000_000_000_000u64.min(BALANCE / 6000);
        assert_eq!(receipt.amount, amount::to_decimal(expected));
        assert_eq!(receipt.destination_address, STANDARD);
        assert_eq!(receipt.transaction_id.len(), 64);

        let records = service.database().get_payouts_for_address(STANDARD).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, expected);
        assert_eq!(records[0].transaction_id, receipt.transaction_id);
        assert_eq!(records[0].requester_hash, hash_identity(CLIENT_IP));
        assert!(!records[0].requester_hash.contains(CLIENT_IP));
    }

    #[tokio::test]
    async fn test_cap_limits_payout() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let config = FaucetConfig {
            payout_factor: 10,
            ..test_config()
        };
        let service = service_with(config, wallet);

        let receipt = service
            .request_payout(INTEGRATED, Some(CLIENT_IP))
            .await
            .unwrap();
        assert_eq!(receipt.amount, Decimal::from(3));
    }

    #[tokio::test]
    async fn test_invalid_address_makes_no_rpc_call() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let service = service_with(test_config(), wallet.clone());
        let long = format!("{}xx", INTEGRATED);

        for len in [94, 105, 107] {
            let err = service
                .request_payout(&long[..len], Some(CLIENT_IP))
                .await
                .unwrap_err();
            assert!(matches!(err, FaucetError::InvalidAddress(_)), "length {}", len);
        }
        assert!(service
            .request_payout("", Some(CLIENT_IP))
            .await
            .is_err());

        assert_eq!(wallet.rpc_calls(), 0);
        assert!(service.database().is_empty());
    }

    #[tokio::test]
    async fn test_address_quota_blocks_after_allowed_payouts() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let service = service_with(test_config(), wallet.clone());

        for i in 0..2 {
            service
                .request_payout(STANDARD, Some(CLIENT_IP))
                .await
                .unwrap();
            assert_eq!(service.database().len(), i + 1);
        }

        let err = service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::AddressRateExceeded { .. }));
        assert_eq!(service.database().len(), 2);
        assert_eq!(wallet.transfer_calls.load(Ordering::SeqCst), 2);

        // Other addresses are still served
        assert!(service
            .request_payout(INTEGRATED, Some(CLIENT_IP))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_client_quota_blocks_second_request() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let config = FaucetConfig {
            client_rate_limit_enabled: true,
            client_rate_period_minutes: 60,
            address_rate_allowed: 10,
            ..test_config()
        };
        let service = service_with(config, wallet.clone());

        service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap();
        let err = service
            .request_payout(INTEGRATED, Some(CLIENT_IP))
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::ClientRateExceeded { .. }));
        assert_eq!(service.database().len(), 1);
        assert_eq!(wallet.transfer_calls.load(Ordering::SeqCst), 1);

        // A different client is unaffected
        assert!(service
            .request_payout(INTEGRATED, Some("198.51.100.1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_transfer_failure_leaves_no_record() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        wallet.set_transfer_failure(true);
        let service = service_with(test_config(), wallet.clone());

        let err = service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::PayoutTransferFailed(_)));
        assert_eq!(wallet.balance_calls.load(Ordering::SeqCst), 1);
        assert!(service.database().is_empty());

        // The failed attempt does not count against the address quota
        wallet.set_transfer_failure(false);
        assert!(service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .is_ok());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_abort_log_carries_amount() {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        wallet.set_transfer_failure(true);
        let service = service_with(test_config(), wallet);
        assert!(service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .is_err());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        let expected = 3_000_000_000_000u64.min(BALANCE / 6000);
        let aborted = output
            .lines()
            .find(|line| line.contains("Payout aborted"))
            .unwrap();
        assert!(aborted.contains("transferring"));
        assert!(aborted.contains(&format!("amount=Some({})", expected)));
        assert!(!output.contains(CLIENT_IP));
    }

    #[tokio::test]
    async fn test_computation_failures_are_wrapped() {
        let wallet = Arc::new(MockWallet::unreachable());
        let service = service_with(test_config(), wallet.clone());

        let err = service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap_err();
        assert!(matches!(err, FaucetError::PayoutComputationFailed(_)));
        assert_eq!(wallet.transfer_calls.load(Ordering::SeqCst), 0);

        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let config = FaucetConfig {
            payout_factor: 0,
            ..test_config()
        };
        let service = service_with(config, wallet.clone());
        let err = service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap_err();
        match err {
            FaucetError::PayoutComputationFailed(inner) => {
                assert!(matches!(*inner, FaucetError::InvalidFactor(0)))
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(wallet.transfer_calls.load(Ordering::SeqCst), 0);
        assert!(service.database().is_empty());
    }

    #[tokio::test]
    async fn test_missing_identity_after_transfer() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let service = service_with(test_config(), wallet.clone());

        let err = service.request_payout(STANDARD, None).await.unwrap_err();
        assert!(matches!(err, FaucetError::MissingClientIdentity { .. }));
        // Funds moved but nothing was recorded
        assert_eq!(wallet.transfer_calls.load(Ordering::SeqCst), 1);
        assert!(service.database().is_empty());

        let err = service.request_payout(STANDARD, Some("")).await.unwrap_err();
        assert!(matches!(err, FaucetError::MissingClientIdentity { .. }));
    }

    #[tokio::test]
    async fn test_balance_ignores_quotas() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let config = FaucetConfig {
            address_rate_allowed: 1,
            client_rate_limit_enabled: true,
            ..test_config()
        };
        let service = service_with(config, wallet);

        assert_eq!(service.balance().await.unwrap().balance, 19_769);
        service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap();
        assert!(service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .is_err());
        assert_eq!(service.balance().await.unwrap().balance, 19_769);
    }

    #[tokio::test]
    async fn test_info_and_status() {
        let wallet = Arc::new(MockWallet::with_balance(BALANCE));
        let service = service_with(test_config(), wallet);

        let info = service.info().await.unwrap();
        assert_eq!(info.network, NetworkType::Stagenet);
        assert_eq!(info.network_other, "testnet");
        assert_eq!(info.wallet_address, STANDARD);

        service
            .request_payout(STANDARD, Some(CLIENT_IP))
            .await
            .unwrap();
        let status = service.status().await.unwrap();
        assert_eq!(status.total_payouts, 1);
        assert_eq!(status.unique_addresses, 1);
        assert_eq!(status.balance, amount::to_decimal(BALANCE));
        assert_eq!(status.maximum_payout, Decimal::from(3));

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["balance"], "19769.691509258199");
        assert_eq!(json["total_dispensed"], "3.000000000000");
    }

    #[test]
    fn test_statistics_amount_keeps_precision() {
        let db = PayoutDatabase::temporary().unwrap();
        db.add_payout(PayoutRecord::new(
            BALANCE,
            STANDARD.to_string(),
            "ab".repeat(32),
            hash_identity(CLIENT_IP),
        ))
        .unwrap();

        let json = serde_json::to_value(db.get_statistics().unwrap()).unwrap();
        assert_eq!(json["total_amount"], "19769.691509258199");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = FaucetConfig {
            address_rate_window_days: 0,
            ..test_config()
        };
        let result = FaucetService::new(
            config,
            PayoutDatabase::temporary().unwrap(),
            Arc::new(MockWallet::with_balance(0)),
        );
        assert!(matches!(result, Err(FaucetError::Config(_))));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(PayoutStage::QuotaChecking.to_string(), "quota_checking");
        assert!(PayoutStage::Aborted.is_terminal());
        assert!(!PayoutStage::Persisting.is_terminal());
    }
}
