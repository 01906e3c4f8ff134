//! JSON-RPC client for monero-wallet-rpc and monerod
//!
//! Every call is a single attempt bounded by the configured timeouts. Transport
//! and envelope failures become [`FaucetError::RpcConnection`]. A reply that
//! lacks the expected field becomes [`FaucetError::InvalidResponse`].

use crate::address::DestinationAddress;
use crate::config::FaucetConfig;
use crate::error::{FaucetError, FaucetResult};
use async_trait::async_trait;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Network the wallet daemon operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Stagenet,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Stagenet => "stagenet",
        }
    }

    /// The other public test network, if this is one
    pub fn counterpart(&self) -> Option<NetworkType> {
        match self {
            NetworkType::Stagenet => Some(NetworkType::Testnet),
            NetworkType::Testnet => Some(NetworkType::Stagenet),
            NetworkType::Mainnet => None,
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = FaucetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "stagenet" => Ok(NetworkType::Stagenet),
            other => Err(FaucetError::InvalidResponse(format!(
                "unknown network type '{}'",
                other
            ))),
        }
    }
}

/// Result of a confirmed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    /// Comma separated hashes of every transaction the daemon created
    pub transaction_id: String,
    /// Total fee paid, in atomic units
    pub fee: u64,
}

/// Wallet operations the payout engine depends on
#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Unlocked balance in atomic units
    async fn get_balance(&self) -> FaucetResult<u64>;

    /// The wallet's own receiving address
    async fn get_address(&self) -> FaucetResult<String>;

    /// Network type, fetched once and cached
    async fn get_network_type(&self) -> FaucetResult<NetworkType>;

    /// Send `amount` atomic units to `destination`
    async fn transfer(
        &self,
        destination: &DestinationAddress,
        amount: u64,
    ) -> FaucetResult<TransferReceipt>;
}

/// Set-once network type slot with explicit reset
///
/// The lock is held across the fetch so concurrent first callers wait for a
/// single RPC instead of racing.
#[derive(Debug, Default)]
pub struct NetworkTypeCache {
    slot: Mutex<Option<NetworkType>>,
}

impl NetworkTypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, running `fetch` only when the slot is empty.
    /// A failed fetch leaves the slot empty.
    pub async fn get_or_try_fetch<F, Fut>(&self, fetch: F) -> FaucetResult<NetworkType>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FaucetResult<NetworkType>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(network) = *slot {
            return Ok(network);
        }

        let network = fetch().await?;
        *slot = Some(network);
        Ok(network)
    }

    pub async fn cached(&self) -> Option<NetworkType> {
        *self.slot.lock().await
    }

    pub async fn reset(&self) {
        *self.slot.lock().await = None;
    }
}

/// Connection settings for [`WalletRpcClient`]
#[derive(Debug, Clone)]
pub struct WalletRpcConfig {
    /// JSON-RPC endpoint of monero-wallet-rpc
    pub wallet_url: String,
    /// JSON-RPC endpoint of monerod, used for `get_info`
    pub daemon_url: String,
    /// Total time allowed for one call
    pub timeout: Duration,
    /// Time allowed to establish the TCP connection
    pub connect_timeout: Duration,
    /// Ring size parameter passed to `transfer_split`
    pub mixin: u32,
}

impl From<&FaucetConfig> for WalletRpcConfig {
    fn from(config: &FaucetConfig) -> Self {
        Self {
            wallet_url: config.wallet_rpc_url(),
            daemon_url: config.daemon_rpc_url(),
            timeout: config.rpc_timeout(),
            connect_timeout: config.rpc_connect_timeout(),
            mixin: config.mixin,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BalanceResult {
    unlocked_balance: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AddressResult {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfoResult {
    nettype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferSplitResult {
    #[serde(default)]
    tx_hash_list: Vec<String>,
    #[serde(default)]
    fee_list: Vec<u64>,
}

/// Client for the wallet daemon's JSON-RPC interface
pub struct WalletRpcClient {
    config: WalletRpcConfig,
    client: reqwest::Client,
    network_type: NetworkTypeCache,
}

impl WalletRpcClient {
    pub fn new(config: WalletRpcConfig) -> FaucetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| FaucetError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            network_type: NetworkTypeCache::new(),
        })
    }

    /// Forget the cached network type so the next lookup hits the daemon
    pub async fn reset_network_type(&self) {
        self.network_type.reset().await;
    }

    async fn call<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> FaucetResult<T> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });

        debug!(method, endpoint = url, "Wallet RPC call");

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!(method, endpoint = url, "RPC error: {}", e);
                FaucetError::RpcConnection(format!("{} on {}: {}", method, url, e))
            })?;

        let envelope: RpcEnvelope = response.json().await.map_err(|e| {
            error!(method, endpoint = url, "Malformed RPC envelope: {}", e);
            FaucetError::RpcConnection(format!("{} on {}: malformed reply: {}", method, url, e))
        })?;

        if let Some(err) = envelope.error {
            error!(method, endpoint = url, code = err.code, "RPC returned error: {}", err.message);
            return Err(FaucetError::RpcConnection(format!(
                "{} on {}: [{}] {}",
                method, url, err.code, err.message
            )));
        }

        let result = envelope.result.ok_or_else(|| {
            FaucetError::RpcConnection(format!("{} on {}: reply has no result", method, url))
        })?;

        serde_json::from_value(result.clone())
            .map_err(|e| FaucetError::InvalidResponse(format!("{}: {} in {}", method, e, result)))
    }

    async fn fetch_network_type(&self) -> FaucetResult<NetworkType> {
        let result: InfoResult = self
            .call(&self.config.daemon_url, "get_info", json!({}))
            .await?;

        let nettype = result
            .nettype
            .filter(|n| !n.is_empty())
            .ok_or_else(|| FaucetError::InvalidResponse("get_info: missing nettype".to_string()))?;

        let network = nettype.parse()?;
        info!("Wallet daemon runs on {}", network);
        Ok(network)
    }
}

#[async_trait]
impl WalletBackend for WalletRpcClient {
    async fn get_balance(&self) -> FaucetResult<u64> {
        let result: BalanceResult = self
            .call(&self.config.wallet_url, "get_balance", json!({ "account_index": 0 }))
            .await?;

        // A zero balance is valid; only an absent field is an error
        result.unlocked_balance.ok_or_else(|| {
            FaucetError::InvalidResponse("get_balance: missing unlocked_balance".to_string())
        })
    }

    async fn get_address(&self) -> FaucetResult<String> {
        let result: AddressResult = self
            .call(&self.config.wallet_url, "get_address", json!({ "account_index": 0 }))
            .await?;

        result
            .address
            .filter(|a| !a.is_empty())
            .ok_or_else(|| FaucetError::InvalidResponse("get_address: missing address".to_string()))
    }

    async fn get_network_type(&self) -> FaucetResult<NetworkType> {
        self.network_type
            .get_or_try_fetch(|| self.fetch_network_type())
            .await
    }

    async fn transfer(
        &self,
        destination: &DestinationAddress,
        amount: u64,
    ) -> FaucetResult<TransferReceipt> {
        let mut params = json!({
            "destinations": [{ "address": destination.as_str(), "amount": amount }],
            "mixin": self.config.mixin,
        });

        if destination.needs_payment_id() {
            params["payment_id"] = Value::String(generate_payment_id());
        }

        let result: TransferSplitResult = self
            .call(&self.config.wallet_url, "transfer_split", params)
            .await?;

        let hashes: Vec<String> = result
            .tx_hash_list
            .into_iter()
            .filter(|h| !h.is_empty())
            .collect();

        if hashes.is_empty() {
            return Err(FaucetError::InvalidResponse(
                "transfer_split: empty tx_hash_list".to_string(),
            ));
        }

        Ok(TransferReceipt {
            transaction_id: hashes.join(","),
            fee: result.fee_list.iter().sum(),
        })
    }
}

/// Long payment id: 32 random bytes, hex encoded
pub fn generate_payment_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
