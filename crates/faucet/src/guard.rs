//! Abuse prevention gates
//!
//! Two independent checks run before any funds move:
//! - an address quota, recomputed from payout history over a trailing window
//! - a per-client limiter allowing one payout request per period

use crate::address::DestinationAddress;
use crate::config::FaucetConfig;
use crate::database::PayoutDatabase;
use crate::error::{FaucetError, FaucetResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DefaultKeyedStateStore,
    Quota, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type KeyedLimiter<C> =
    RateLimiter<String, DefaultKeyedStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Payouts allowed per address within a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressQuota {
    pub rate_allowed: u32,
    pub window_days: u32,
}

/// One request per period per client identity
///
/// Check-and-mark is a single compare-and-swap inside governor, so concurrent
/// requests with the same key cannot both pass.
pub struct ClientQuota<C: Clock = DefaultClock> {
    limiter: KeyedLimiter<C>,
    clock: C,
}

impl ClientQuota<DefaultClock> {
    pub fn new(period: Duration) -> FaucetResult<Self> {
        Self::with_clock(period, DefaultClock::default())
    }
}

impl<C: Clock> ClientQuota<C> {
    pub fn with_clock(period: Duration, clock: C) -> FaucetResult<Self> {
        let quota = Quota::with_period(period).ok_or_else(|| {
            FaucetError::Config("client rate period must be non-zero".to_string())
        })?;
        let limiter = RateLimiter::new(quota, DefaultKeyedStateStore::default(), &clock);

        Ok(Self {
            limiter,
            clock,
        })
    }

    /// Admit and mark `key`, or report how long it must wait
    pub fn check(&self, key: &str) -> FaucetResult<()> {
        self.limiter.check_key(&key.to_string()).map_err(|not_until| {
            let wait = not_until.wait_time_from(self.clock.now());
            FaucetError::ClientRateExceeded {
                retry_after_secs: wait.as_secs().max(1),
            }
        })
    }

    /// Forget clients whose window has passed
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }
}

/// Both abuse gates, evaluated before a transfer
pub struct AbuseGuard {
    database: Arc<PayoutDatabase>,
    address_quota: AddressQuota,
    client_quota: Option<ClientQuota>,
}

impl AbuseGuard {
    pub fn new(
        database: Arc<PayoutDatabase>,
        address_quota: AddressQuota,
        client_quota: Option<ClientQuota>,
    ) -> Self {
        Self {
            database,
            address_quota,
            client_quota,
        }
    }

    pub fn from_config(database: Arc<PayoutDatabase>, config: &FaucetConfig) -> FaucetResult<Self> {
        let client_quota = if config.client_rate_limit_enabled {
            Some(ClientQuota::new(config.client_rate_period())?)
        } else {
            None
        };

        Ok(Self::new(
            database,
            AddressQuota {
                rate_allowed: config.address_rate_allowed,
                window_days: config.address_rate_window_days,
            },
            client_quota,
        ))
    }

    /// True when `address` already has `rate_allowed` or more payouts in the
    /// trailing `window_days`
    pub fn is_address_over_quota(
        &self,
        address: &str,
        rate_allowed: u32,
        window_days: u32,
    ) -> FaucetResult<bool> {
        self.is_address_over_quota_at(address, rate_allowed, window_days, Utc::now())
    }

    pub fn is_address_over_quota_at(
        &self,
        address: &str,
        rate_allowed: u32,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> FaucetResult<bool> {
        // Window ends at the store clock, which may be ahead of the wall clock
        let now = self.database.clock(now);
        let start = now - ChronoDuration::days(window_days as i64);
        let count = self.database.count_payouts_since(address, start)?;
        debug!("Address {} has {} payout(s) in the last {} day(s)", address, count, window_days);
        Ok(count >= rate_allowed as usize)
    }

    /// Address gate with the configured quota
    pub fn check_address(&self, address: &DestinationAddress) -> FaucetResult<()> {
        let AddressQuota {
            rate_allowed,
            window_days,
        } = self.address_quota;

        if self.is_address_over_quota(address.as_str(), rate_allowed, window_days)? {
            warn!("Address {} blocked by payout quota", address);
            return Err(FaucetError::AddressRateExceeded {
                address: address.to_string(),
                allowed: rate_allowed,
                window_days,
            });
        }
        Ok(())
    }

    /// Client gate keyed by the hashed identity; a no-op when disabled
    pub fn check_client(&self, identity_hash: &str) -> FaucetResult<()> {
        match &self.client_quota {
            Some(quota) => quota.check(identity_hash).map_err(|e| {
                warn!("Client {} blocked by rate limit", identity_hash);
                e
            }),
            None => Ok(()),
        }
    }

    pub fn client_limit_enabled(&self) -> bool {
        self.client_quota.is_some()
    }

    pub fn prune_client_state(&self) {
        if let Some(quota) = &self.client_quota {
            quota.prune();
        }
    }
}
