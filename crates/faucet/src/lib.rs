//! Payout engine for a Monero faucet
//!
//! Hands out small amounts from a wallet driven over monero-wallet-rpc:
//! - Payout sizing from the wallet balance, capped per request
//! - Address and client quotas
//! - Payout history in sled
//! - HTTP API and Prometheus metrics

pub mod address;
pub mod amount;
pub mod api;
pub mod calculator;
pub mod config;
pub mod database;
pub mod error;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod service;
pub mod wallet_rpc;

pub use address::{AddressKind, DestinationAddress};
pub use config::FaucetConfig;
pub use database::{PayoutDatabase, PayoutRecord, PayoutStatistics};
pub use error::{FaucetError, FaucetResult};
pub use service::{FaucetService, FaucetStatus, PayoutReceipt, PayoutStage};
pub use wallet_rpc::{NetworkType, WalletBackend, WalletRpcClient};
