use crate::handlers::{health, job, write};
use crate::middleware::{metrics::metrics_layer, rate_limit::rate_limit_layer, signature::verify_signature_layer, trace::trace_id_layer};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    let write_route = Router::new()
        .route("/api/v1/blob/write", post(write::write))
        .layer(middleware::from_fn_with_state(state.clone(), verify_signature_layer))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_layer))
        .layer(middleware::from_fn_with_state(state.clone(), metrics_layer))
        .layer(middleware::from_fn(trace_id_layer));

    let read_routes = Router::new()
        .route("/api/v1/job/:jobId", get(job::get_job))
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/health/details", get(health::health_details))
        .route("/api/v1/address", get(health::address))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_layer))
        .layer(middleware::from_fn_with_state(state.clone(), metrics_layer))
        .layer(middleware::from_fn(trace_id_layer));

    // /metrics stays outside the rate limiter and tracing stack entirely,
    // per spec.md 4.9: "not rate-limited".
    let metrics_route = Router::new().route("/metrics", get(health::metrics));

    Router::new()
        .merge(write_route)
        .merge(read_routes)
        .merge(metrics_route)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
