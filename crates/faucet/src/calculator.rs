//! Payout amount calculation
//!
//! Scripts draining the faucet are throttled twice: a payout is only a
//! fraction of the unlocked balance, and never more than the configured cap.

use crate::error::{FaucetError, FaucetResult};
use crate::wallet_rpc::WalletBackend;
use std::sync::Arc;
use tracing::{error, info};

pub struct PayoutCalculator {
    wallet: Arc<dyn WalletBackend>,
    max_payout_atomic: u64,
}

impl PayoutCalculator {
    pub fn new(wallet: Arc<dyn WalletBackend>, max_payout_atomic: u64) -> Self {
        Self {
            wallet,
            max_payout_atomic,
        }
    }

    pub fn max_payout_atomic(&self) -> u64 {
        self.max_payout_atomic
    }

    /// `min(max_payout, balance / factor)` in atomic units
    pub async fn compute_amount(&self, factor: i64) -> FaucetResult<u64> {
        let balance = self.wallet.get_balance().await?;

        if factor <= 0 {
            error!("Wrong factor provided: {}", factor);
            return Err(FaucetError::InvalidFactor(factor));
        }

        let payout = self.max_payout_atomic.min(balance / factor as u64);
        info!("Paying: {} (balance {}, factor {})", payout, balance, factor);
        Ok(payout)
    }
}
