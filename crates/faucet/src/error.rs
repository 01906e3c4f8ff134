//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid payout factor: {0}")]
    InvalidFactor(i64),

    #[error("Wallet RPC connection error: {0}")]
    RpcConnection(String),

    #[error("Invalid wallet RPC response: {0}")]
    InvalidResponse(String),

    #[error("Address {address} reached its payout quota of {allowed} per {window_days} day(s)")]
    AddressRateExceeded {
        address: String,
        allowed: u32,
        window_days: u32,
    },

    #[error("Client rate limit exceeded: try again in {retry_after_secs} seconds")]
    ClientRateExceeded { retry_after_secs: u64 },

    #[error("Could not compute payout amount: {0}")]
    PayoutComputationFailed(#[source] Box<FaucetError>),

    #[error("Could not make transaction: {0}")]
    PayoutTransferFailed(#[source] Box<FaucetError>),

    #[error("Client identity unavailable for transaction {transaction_id}")]
    MissingClientIdentity { transaction_id: String },

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FaucetError {
    /// Machine readable code returned in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            FaucetError::InvalidAddress(_) => "INVALID_ADDRESS",
            FaucetError::InvalidAmount(_) => "INVALID_AMOUNT",
            FaucetError::InvalidFactor(_) => "INVALID_FACTOR",
            FaucetError::RpcConnection(_) => "RPC_CONNECTION_ERROR",
            FaucetError::InvalidResponse(_) => "INVALID_RESPONSE",
            FaucetError::AddressRateExceeded { .. } => "ADDRESS_RATE_EXCEEDED",
            FaucetError::ClientRateExceeded { .. } => "CLIENT_RATE_EXCEEDED",
            FaucetError::PayoutComputationFailed(_) => "PAYOUT_COMPUTATION_FAILED",
            FaucetError::PayoutTransferFailed(_) => "PAYOUT_TRANSFER_FAILED",
            FaucetError::MissingClientIdentity { .. } => "MISSING_CLIENT_IDENTITY",
            FaucetError::Database(_) => "DATABASE_ERROR",
            FaucetError::Config(_) => "CONFIG_ERROR",
            FaucetError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FaucetError::InvalidAddress(_) | FaucetError::InvalidAmount(_) => {
                StatusCode::BAD_REQUEST
            }
            FaucetError::AddressRateExceeded { .. } | FaucetError::ClientRateExceeded { .. } => {
                StatusCode::FORBIDDEN
            }
            FaucetError::RpcConnection(_) | FaucetError::InvalidResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the request was rejected because of the requester's input or quota
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// True for failures talking to the wallet daemon, including malformed replies
    pub fn is_rpc_failure(&self) -> bool {
        matches!(
            self,
            FaucetError::RpcConnection(_) | FaucetError::InvalidResponse(_)
        )
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            FaucetError::AddressRateExceeded { .. } => "Sorry you are blocked.".to_string(),
            FaucetError::ClientRateExceeded { retry_after_secs } => format!(
                "Sorry you are blocked. Try again in {} seconds",
                retry_after_secs
            ),
            // Server side failures keep their details in the log only
            FaucetError::PayoutTransferFailed(_) | FaucetError::MissingClientIdentity { .. } => {
                "Could not make transaction.".to_string()
            }
            FaucetError::Database(_) | FaucetError::Internal(_) | FaucetError::Config(_) => {
                "Internal server error.".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
