//! Pipeline stage 1: derive or generate `traceId`, attach it to the
//! tracing span and echo it back on the response.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

pub async fn trace_id_layer(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", trace_id = %trace_id, path = %request.uri().path());
    let _entered = span.enter();

    request.extensions_mut().insert(TraceId(trace_id.clone()));
    drop(_entered);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

#[derive(Debug, Clone)]
pub struct TraceId(pub String);
