//! Faucet configuration

use crate::amount;
use crate::error::{FaucetError, FaucetResult};
use crate::logging::LoggingConfig;
use ::config::{Config, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Faucet service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaucetConfig {
    /// Server address
    pub server_addr: String,

    /// monero-wallet-rpc host
    pub wallet_host: String,

    /// monero-wallet-rpc port
    pub wallet_port: u16,

    /// monerod host for `get_info`, defaults to the wallet host
    pub daemon_host: Option<String>,

    /// monerod port for `get_info`, defaults to the wallet port
    pub daemon_port: Option<u16>,

    /// Ceiling for a single RPC call (seconds)
    pub rpc_timeout_secs: u64,

    /// Connect timeout for RPC calls (seconds)
    pub rpc_connect_timeout_secs: u64,

    /// Ring size parameter for transfers
    pub mixin: u32,

    /// Payout is the unlocked balance divided by this factor
    pub payout_factor: i64,

    /// Hard cap on a single payout (decimal XMR)
    pub maximum_payout: Decimal,

    /// Payouts allowed per destination address within the window
    pub address_rate_allowed: u32,

    /// Address quota window (days)
    pub address_rate_window_days: u32,

    /// One payout request per client every N minutes
    pub client_rate_period_minutes: u64,

    /// Enable the per-client limiter
    pub client_rate_limit_enabled: bool,

    /// Database path
    pub db_path: String,

    /// Enable metrics endpoint
    pub metrics_enabled: bool,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Logging setup
    pub logging: LoggingConfig,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            server_addr: "0.0.0.0:8000".to_string(),
            wallet_host: "127.0.0.1".to_string(),
            wallet_port: 38083, // stagenet wallet rpc
            daemon_host: None,
            daemon_port: None,
            rpc_timeout_secs: 30,
            rpc_connect_timeout_secs: 10,
            mixin: 10,
            payout_factor: 1000,
            maximum_payout: Decimal::from(3),
            address_rate_allowed: 1,
            address_rate_window_days: 1,
            client_rate_period_minutes: 60,
            client_rate_limit_enabled: true,
            db_path: "./faucet_data".to_string(),
            metrics_enabled: true,
            cors_enabled: true,
            logging: LoggingConfig::default(),
        }
    }
}

impl FaucetConfig {
    /// Load configuration: defaults, then an optional file, then `FAUCET_*` variables
    pub fn load(path: Option<&Path>) -> FaucetResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a TOML/YAML/JSON file on top of the defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> FaucetResult<Self> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| FaucetError::Config("Invalid config path".to_string()))?;

        let defaults = Config::try_from(&Self::default())
            .map_err(|e| FaucetError::Config(format!("Failed to build defaults: {}", e)))?;

        Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(path_str))
            .build()
            .and_then(|settings| settings.try_deserialize::<Self>())
            .map_err(|e| FaucetError::Config(format!("Failed to load {}: {}", path_str, e)))
    }

    /// Override fields from `FAUCET_*` variables; unparsable values are ignored
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("FAUCET_SERVER_ADDR") {
            self.server_addr = addr;
        }

        if let Some(host) = lookup("FAUCET_WALLET_HOST") {
            self.wallet_host = host;
        }

        if let Some(port) = lookup("FAUCET_WALLET_PORT") {
            self.wallet_port = port.parse().unwrap_or(self.wallet_port);
        }

        if let Some(host) = lookup("FAUCET_DAEMON_HOST") {
            self.daemon_host = Some(host);
        }

        if let Some(port) = lookup("FAUCET_DAEMON_PORT") {
            self.daemon_port = port.parse().ok().or(self.daemon_port);
        }

        if let Some(timeout) = lookup("FAUCET_RPC_TIMEOUT") {
            self.rpc_timeout_secs = timeout.parse().unwrap_or(self.rpc_timeout_secs);
        }

        if let Some(timeout) = lookup("FAUCET_RPC_CONNECT_TIMEOUT") {
            self.rpc_connect_timeout_secs =
                timeout.parse().unwrap_or(self.rpc_connect_timeout_secs);
        }

        if let Some(mixin) = lookup("FAUCET_MIXIN") {
            self.mixin = mixin.parse().unwrap_or(self.mixin);
        }

        if let Some(factor) = lookup("FAUCET_PAYOUT_FACTOR") {
            self.payout_factor = factor.parse().unwrap_or(self.payout_factor);
        }

        if let Some(max) = lookup("FAUCET_MAXIMUM_PAYOUT") {
            self.maximum_payout = Decimal::from_str(&max).unwrap_or(self.maximum_payout);
        }

        if let Some(allowed) = lookup("FAUCET_ADDRESS_RATE_ALLOWED") {
            self.address_rate_allowed = allowed.parse().unwrap_or(self.address_rate_allowed);
        }

        if let Some(days) = lookup("FAUCET_ADDRESS_RATE_WINDOW_DAYS") {
            self.address_rate_window_days = days.parse().unwrap_or(self.address_rate_window_days);
        }

        if let Some(minutes) = lookup("FAUCET_CLIENT_RATE_PERIOD_MINUTES") {
            self.client_rate_period_minutes =
                minutes.parse().unwrap_or(self.client_rate_period_minutes);
        }

        if let Some(enabled) = lookup("FAUCET_CLIENT_RATE_LIMIT_ENABLED") {
            self.client_rate_limit_enabled = enabled.to_lowercase() == "true";
        }

        if let Some(db_path) = lookup("FAUCET_DB_PATH") {
            self.db_path = db_path;
        }

        if let Some(enabled) = lookup("FAUCET_METRICS_ENABLED") {
            self.metrics_enabled = enabled.to_lowercase() == "true";
        }

        if let Some(enabled) = lookup("FAUCET_CORS_ENABLED") {
            self.cors_enabled = enabled.to_lowercase() == "true";
        }

        if let Some(level) = lookup("FAUCET_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Reject settings the service cannot start with
    pub fn validate(&self) -> FaucetResult<()> {
        self.maximum_payout_atomic()?;

        if self.address_rate_window_days == 0 {
            return Err(FaucetError::Config(
                "address_rate_window_days must be at least 1".to_string(),
            ));
        }

        if self.client_rate_limit_enabled && self.client_rate_period_minutes == 0 {
            return Err(FaucetError::Config(
                "client_rate_period_minutes must be at least 1".to_string(),
            ));
        }

        if self.rpc_timeout_secs == 0 || self.rpc_connect_timeout_secs == 0 {
            return Err(FaucetError::Config("RPC timeouts must be non-zero".to_string()));
        }

        // Reported per request as a computation failure
        if self.payout_factor <= 0 {
            warn!("payout_factor is {}; every payout will fail", self.payout_factor);
        }

        Ok(())
    }

    pub fn wallet_rpc_url(&self) -> String {
        format!("http://{}:{}/json_rpc", self.wallet_host, self.wallet_port)
    }

    pub fn daemon_rpc_url(&self) -> String {
        format!(
            "http://{}:{}/json_rpc",
            self.daemon_host.as_deref().unwrap_or(&self.wallet_host),
            self.daemon_port.unwrap_or(self.wallet_port)
        )
    }

    /// Payout cap in atomic units
    pub fn maximum_payout_atomic(&self) -> FaucetResult<u64> {
        amount::to_atomic(self.maximum_payout)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn rpc_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_connect_timeout_secs)
    }

    pub fn client_rate_period(&self) -> Duration {
        Duration::from_secs(self.client_rate_period_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = FaucetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.maximum_payout_atomic().unwrap(), 3_000_000_000_000);
        assert_eq!(config.wallet_rpc_url(), "http://127.0.0.1:38083/json_rpc");
        // Daemon falls back to the wallet endpoint
        assert_eq!(config.daemon_rpc_url(), config.wallet_rpc_url());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FAUCET_WALLET_HOST", "wallet"),
            ("FAUCET_WALLET_PORT", "18083"),
            ("FAUCET_DAEMON_PORT", "38081"),
            ("FAUCET_PAYOUT_FACTOR", "500"),
            ("FAUCET_MAXIMUM_PAYOUT", "0.5"),
            ("FAUCET_CLIENT_RATE_LIMIT_ENABLED", "false"),
            ("FAUCET_ADDRESS_RATE_ALLOWED", "not-a-number"),
            ("FAUCET_RPC_CONNECT_TIMEOUT", "3"),
            ("FAUCET_METRICS_ENABLED", "false"),
            ("FAUCET_CORS_ENABLED", "FALSE"),
        ]
        .into_iter()
        .collect();

        let mut config = FaucetConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.wallet_rpc_url(), "http://wallet:18083/json_rpc");
        assert_eq!(config.daemon_rpc_url(), "http://wallet:38081/json_rpc");
        assert_eq!(config.payout_factor, 500);
        assert_eq!(config.maximum_payout_atomic().unwrap(), 500_000_000_000);
        assert!(!config.client_rate_limit_enabled);
        assert_eq!(config.rpc_connect_timeout(), Duration::from_secs(3));
        assert!(!config.metrics_enabled);
        assert!(!config.cors_enabled);
        // Unparsable values keep the default
        assert_eq!(config.address_rate_allowed, 1);
    }

    #[test]
    fn test_from_file_merges_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "wallet_host = \"10.0.0.2\"\npayout_factor = 250\nmaximum_payout = \"1.5\"\n\n[logging]\nlevel = \"debug\""
        )
        .unwrap();

        let config = FaucetConfig::from_file(file.path()).unwrap();
        assert_eq!(config.wallet_host, "10.0.0.2");
        assert_eq!(config.payout_factor, 250);
        assert_eq!(config.maximum_payout_atomic().unwrap(), 1_500_000_000_000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.wallet_port, 38083);
    }

    #[test]
    fn test_validate_rejects_bad_windows() {
        let config = FaucetConfig {
            address_rate_window_days: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FaucetError::Config(_))));

        let config = FaucetConfig {
            maximum_payout: Decimal::from(-1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(FaucetError::InvalidAmount(_))));
    }
}
