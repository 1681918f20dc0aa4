//! Pipeline stage 4: verify HMAC-SHA256 over
//! `${timestamp}:${nonce}:${canonicalBody}` using a shared secret. Runs
//! before body validation/deserialization, with the request body pulled in
//! and put back so downstream layers see the same bytes.

use crate::state::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use blobkit_common::{KnownErrorKind, ProxyError};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-blobkit-signature";
const TIMESTAMP_HEADER: &str = "x-blobkit-timestamp";
const NONCE_HEADER: &str = "x-blobkit-nonce";
const SIGNATURE_VERSION_PREFIX: &str = "v1:";
const MAX_SKEW_SECS: i64 = 5 * 60;
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn header_str<'a>(request: &'a Request, name: &str) -> Result<&'a str, ProxyError> {
    request
        .headers()
        .get(name)
        .ok_or_else(|| ProxyError::new(KnownErrorKind::InvalidRequest, format!("missing header {name}")))?
        .to_str()
        .map_err(|_| ProxyError::new(KnownErrorKind::InvalidRequest, format!("invalid header {name}")))
}

pub async fn verify_signature_layer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ProxyError> {
    let signature_header = header_str(&request, SIGNATURE_HEADER)?.to_string();
    let timestamp_header = header_str(&request, TIMESTAMP_HEADER)?.to_string();
    let nonce = header_str(&request, NONCE_HEADER)?.to_string();

    if !signature_header.starts_with(SIGNATURE_VERSION_PREFIX) {
        return Err(ProxyError::new(
            KnownErrorKind::InvalidRequest,
            "unsupported signature version",
        ));
    }
    let provided_hex = &signature_header[SIGNATURE_VERSION_PREFIX.len()..];

    let timestamp: i64 = timestamp_header
        .parse()
        .map_err(|_| ProxyError::new(KnownErrorKind::InvalidRequest, "invalid timestamp header"))?;
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    if (now_ms - timestamp).abs() > MAX_SKEW_SECS * 1000 {
        return Err(ProxyError::new(KnownErrorKind::InvalidRequest, "timestamp skew too large"));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ProxyError::new(KnownErrorKind::InvalidRequest, "body too large or unreadable"))?;

    let expected_hex = compute_signature(
        state.config.request_signing_secret.as_bytes(),
        timestamp,
        &nonce,
        &bytes,
    )
    .map_err(|_| ProxyError::internal("invalid signing secret length"))?;

    if expected_hex.len() != provided_hex.len() {
        return Err(ProxyError::new(KnownErrorKind::InvalidRequest, "signature length mismatch"));
    }
    let equal: bool = expected_hex.as_bytes().ct_eq(provided_hex.as_bytes()).into();
    if !equal {
        return Err(ProxyError::new(KnownErrorKind::InvalidRequest, "signature mismatch"));
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

/// Computes `hex(HMAC-SHA256(secret, "{timestamp}:{nonce}:{body}"))`.
fn compute_signature(secret: &[u8], timestamp: i64, nonce: &str, body: &[u8]) -> Result<String, String> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| "invalid secret length".to_string())?;
    mac.update(format!("{timestamp}:{nonce}:").as_bytes());
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_produce_same_signature() {
        let a = compute_signature(b"secret", 1000, "nonce-1", b"{}").unwrap();
        let b = compute_signature(b"secret", 1000, "nonce-1", b"{}").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_nonce_changes_signature() {
        let a = compute_signature(b"secret", 1000, "nonce-1", b"{}").unwrap();
        let b = compute_signature(b"secret", 1000, "nonce-2", b"{}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_body_changes_signature() {
        let a = compute_signature(b"secret", 1000, "nonce-1", b"{\"a\":1}").unwrap();
        let b = compute_signature(b"secret", 1000, "nonce-1", b"{\"a\":2}").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_secret_changes_signature() {
        let a = compute_signature(b"secret-a", 1000, "nonce-1", b"{}").unwrap();
        let b = compute_signature(b"secret-b", 1000, "nonce-1", b"{}").unwrap();
        assert_ne!(a, b);
    }
}
