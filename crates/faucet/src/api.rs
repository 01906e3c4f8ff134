//! HTTP API for faucet service

use crate::error::FaucetResult;
use crate::service::{BalanceResponse, FaucetInfo, FaucetService, FaucetStatus, PayoutReceipt};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Payout request body
#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    #[serde(default)]
    pub destination_address: String,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub data: T,
    pub timestamp: String,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

/// Build the faucet router
pub fn router(service: Arc<FaucetService>) -> Router {
    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/payout", get(balance_handler).post(payout_handler))
        .route("/api/info", get(info_handler))
        .route("/api/status", get(status_handler));

    if service.config().metrics_enabled {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.with_state(service)
}

/// Requester identity: `X-Real-IP`, then the last `X-Forwarded-For` hop,
/// then the socket peer
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(real_ip) = header_value("x-real-ip") {
        return Some(real_ip.to_string());
    }

    let forwarded = header_value("x-forwarded-for")
        .and_then(|list| list.rsplit(',').map(str::trim).find(|hop| !hop.is_empty()));
    if let Some(hop) = forwarded {
        return Some(hop.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Payout handler
pub async fn payout_handler(
    State(service): State<Arc<FaucetService>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<PayoutRequest>,
) -> FaucetResult<(StatusCode, Json<PayoutReceipt>)> {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let identity = client_identity(&headers, peer);
    info!(
        "Payout request for address={} (identity resolved: {})",
        request.destination_address,
        identity.is_some()
    );

    let receipt = service
        .request_payout(&request.destination_address, identity.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Balance handler
pub async fn balance_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<BalanceResponse>> {
    Ok(Json(service.balance().await?))
}

/// Info handler
pub async fn info_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<FaucetInfo>>> {
    let info = service.info().await?;
    Ok(SuccessResponse::new(info))
}

/// Status handler
pub async fn status_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<Json<SuccessResponse<FaucetStatus>>> {
    let status = service.status().await?;
    Ok(SuccessResponse::new(status))
}

/// Prometheus metrics handler
pub async fn metrics_handler(
    State(service): State<Arc<FaucetService>>,
) -> FaucetResult<impl IntoResponse> {
    let body = service.metrics().gather()?;
    debug!("Serving {} bytes of metrics", body.len());
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Monero Faucet",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /api/payout": "Request a payout",
            "GET /api/payout": "Wallet balance (whole XMR)",
            "GET /api/info": "Wallet address and network",
            "GET /api/status": "Faucet status",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}
