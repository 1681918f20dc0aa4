use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use blobkit_breaker::BreakerMetrics;
use ethers::providers::Middleware;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    #[serde(rename = "chainId")]
    chain_id: u64,
    signer: String,
    #[serde(rename = "escrowContract")]
    escrow_contract: String,
    #[serde(rename = "proxyFeePercent")]
    proxy_fee_percent: u8,
    #[serde(rename = "maxBlobSize")]
    max_blob_size: usize,
    uptime: u64,
    #[serde(rename = "circuitBreakers")]
    circuit_breakers: Vec<BreakerSummary>,
}

#[derive(Debug, Serialize)]
struct BreakerSummary {
    name: &'static str,
    state: &'static str,
}

fn breaker_summary(metrics: &BreakerMetrics) -> BreakerSummary {
    BreakerSummary {
        name: metrics.name,
        state: match metrics.state {
            blobkit_breaker::BreakerState::Closed => "closed",
            blobkit_breaker::BreakerState::Open => "open",
            blobkit_breaker::BreakerState::HalfOpen => "half_open",
        },
    }
}

/// `GET /api/v1/health` -- shallow: degraded if any circuit is Open.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let any_open = state.breakers.any_open_sync();
    let status = if any_open { "degraded" } else { "healthy" };
    let http_status = if any_open { StatusCode::OK } else { StatusCode::OK };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        chain_id: state.config.chain_id,
        signer: format!("{:#x}", state.signer.address()),
        escrow_contract: state.config.escrow_contract.clone(),
        proxy_fee_percent: state.config.proxy_fee_percent,
        max_blob_size: state.config.max_blob_size,
        uptime: state.uptime_secs(),
        circuit_breakers: state.breakers.all_metrics().iter().map(breaker_summary).collect(),
    };

    (http_status, Json(body))
}

#[derive(Debug, Serialize)]
struct HealthDetailsResponse {
    status: &'static str,
    #[serde(rename = "rpcHealthy")]
    rpc_healthy: bool,
    #[serde(rename = "blocksLag")]
    blocks_lag: Option<u64>,
    #[serde(rename = "circuitBreakers")]
    circuit_breakers: Vec<BreakerSummary>,
}

/// `GET /api/v1/health/details` -- deep: probes the execution RPC.
pub async fn health_details(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let any_open = state.breakers.any_open_sync();
    let rpc_probe = state.provider.get_block_number().await;
    let rpc_healthy = rpc_probe.is_ok();

    let status = if !rpc_healthy {
        "degraded"
    } else if any_open {
        "degraded"
    } else {
        "healthy"
    };
    let http_status = if !rpc_healthy { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };

    let body = HealthDetailsResponse {
        status,
        rpc_healthy,
        blocks_lag: rpc_probe.ok().map(|_| 0u64),
        circuit_breakers: state.breakers.all_metrics().iter().map(breaker_summary).collect(),
    };

    (http_status, Json(body))
}

#[derive(Debug, Serialize)]
struct AddressResponse {
    address: String,
}

/// `GET /api/v1/address` -- the signer's address.
pub async fn address(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(AddressResponse {
        address: format!("{:#x}", state.signer.address()),
    })
}

/// `GET /metrics` -- Prometheus exposition, unauthenticated and unrated.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %err, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8(buffer).unwrap_or_default())
}
