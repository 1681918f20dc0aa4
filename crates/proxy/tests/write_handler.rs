//! HTTP-level coverage of the write handler's 11-step pipeline, run
//! against in-memory doubles for the escrow verifier, blob executor,
//! job cache and completion queue so no live chain or Redis is needed.

mod support;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use blobkit_common::{WriteResponse, PENDING_COMPLETION_SENTINEL};
use ethers::types::{Address, H256, U256};
use support::{
    build_state, sign_payload, signed_request, test_signer_address, FakeCache, FakeExecutor, FakeQueue,
    FakeVerifier, JobFixture, SIGNING_SECRET,
};
use tower::ServiceExt;

fn job_id(byte: u8) -> H256 {
    H256::repeat_byte(byte)
}

fn fixture(user: Address, valid: bool, completed: bool) -> JobFixture {
    JobFixture {
        user,
        amount: U256::from(1_000_000_000_000_000u64),
        valid,
        completed,
        is_expired: false,
    }
}

async fn post_write(
    state: std::sync::Arc<blobkit_proxy::state::AppState>,
    job: H256,
    payment_tx_hash: H256,
    payload: &[u8],
    signature: &[u8],
    nonce: &str,
) -> axum::response::Response {
    let cors = tower_http::cors::CorsLayer::new().allow_origin(tower_http::cors::Any);
    let app = blobkit_proxy::router::build_router(state, cors);

    let body = serde_json::json!({
        "jobId": format!("{job:#x}"),
        "paymentTxHash": format!("{payment_tx_hash:#x}"),
        "payload": BASE64.encode(payload),
        "signature": BASE64.encode(signature),
        "timestamp": support::now_millis(),
    })
    .to_string();

    let request = signed_request(SIGNING_SECRET, body.as_bytes(), nonce)
        .body(axum::body::Body::from(body))
        .unwrap();

    app.oneshot(request).await.unwrap()
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    body["error"].as_str().unwrap().to_string()
}

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn happy_path_submits_blob_and_settles_escrow() {
    let user = test_signer_address();
    let harness = build_state(
        FakeVerifier::new(fixture(user, true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = b"hello blobkit".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(1), job_id(2), &payload, &signature, "nonce-1").await;

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let parsed: WriteResponse = body_json(response).await;
    assert!(parsed.success);
    assert_ne!(parsed.completion_tx_hash, PENDING_COMPLETION_SENTINEL);
}

#[tokio::test]
async fn duplicate_submission_is_served_from_idempotency_cache() {
    let user = test_signer_address();
    let harness = build_state(
        FakeVerifier::new(fixture(user, true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = b"duplicate me".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let id = job_id(3);

    let first = post_write(harness.state.clone(), id, job_id(4), &payload, &signature, "nonce-a").await;
    assert_eq!(first.status(), axum::http::StatusCode::OK);
    let first_body: WriteResponse = body_json(first).await;

    let second = post_write(harness.state, id, job_id(4), &payload, &signature, "nonce-b").await;
    assert_eq!(second.status(), axum::http::StatusCode::OK);
    let second_body: WriteResponse = body_json(second).await;

    assert_eq!(first_body, second_body);
}

#[tokio::test]
async fn invalid_payment_is_rejected_with_an_insufficient_message() {
    let user = test_signer_address();
    let harness = build_state(
        FakeVerifier::new(fixture(user, false, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = b"no money".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(5), job_id(6), &payload, &signature, "nonce-c").await;

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"], "PAYMENT_INVALID");
    assert!(body["message"].as_str().unwrap().contains("insufficient"));
}

#[tokio::test]
async fn already_completed_job_is_rejected() {
    let user = test_signer_address();
    let harness = build_state(
        FakeVerifier::new(fixture(user, true, true)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = b"already done".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(7), job_id(8), &payload, &signature, "nonce-d").await;

    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "JOB_ALREADY_COMPLETED");
}

#[tokio::test]
async fn signer_mismatch_is_rejected() {
    let harness = build_state(
        FakeVerifier::new(fixture(Address::repeat_byte(9), true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = b"wrong signer".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(9), job_id(10), &payload, &signature, "nonce-e").await;

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "SIGNATURE_INVALID");
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let user = test_signer_address();
    let harness = build_state(
        FakeVerifier::new(fixture(user, true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = vec![0u8; harness.state.config.max_blob_size + 1];
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(11), job_id(12), &payload, &signature, "nonce-f").await;

    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "BLOB_TOO_LARGE");
}

#[tokio::test]
async fn locked_job_returns_425() {
    let user = test_signer_address();
    let cache = FakeCache::default();
    cache.deny_lock.store(true, std::sync::atomic::Ordering::SeqCst);
    let harness = build_state(
        FakeVerifier::new(fixture(user, true, false)),
        FakeExecutor::succeeding(),
        cache,
        FakeQueue::default(),
    );

    let payload = b"contended".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(13), job_id(14), &payload, &signature, "nonce-g").await;

    assert_eq!(response.status(), axum::http::StatusCode::from_u16(425).unwrap());
}

#[tokio::test]
async fn completion_failure_falls_back_to_the_retry_queue() {
    let user = test_signer_address();
    let harness = build_state(
        FakeVerifier::failing_completion(fixture(user, true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );

    let payload = b"settles later".to_vec();
    let signature = sign_payload(&harness.executor_signer, &payload).await;
    let response = post_write(harness.state, job_id(15), job_id(16), &payload, &signature, "nonce-h").await;

    assert_eq!(response.status(), axum::http::StatusCode::OK);
    let parsed: WriteResponse = body_json(response).await;
    assert_eq!(parsed.completion_tx_hash, PENDING_COMPLETION_SENTINEL);
}

#[tokio::test]
async fn missing_signature_header_is_rejected_before_the_handler_runs() {
    let harness = build_state(
        FakeVerifier::new(fixture(Address::zero(), true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );
    let cors = tower_http::cors::CorsLayer::new().allow_origin(tower_http::cors::Any);
    let app = blobkit_proxy::router::build_router(harness.state, cors);

    let body = serde_json::json!({
        "jobId": format!("{:#x}", job_id(17)),
        "paymentTxHash": format!("{:#x}", job_id(18)),
        "payload": BASE64.encode(b"no headers"),
        "signature": BASE64.encode([0u8; 65]),
        "timestamp": support::now_millis(),
    })
    .to_string();

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/blob/write")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tampered_body_fails_signature_verification() {
    let harness = build_state(
        FakeVerifier::new(fixture(Address::zero(), true, false)),
        FakeExecutor::succeeding(),
        FakeCache::default(),
        FakeQueue::default(),
    );
    let cors = tower_http::cors::CorsLayer::new().allow_origin(tower_http::cors::Any);
    let app = blobkit_proxy::router::build_router(harness.state, cors);

    let signed_body = serde_json::json!({
        "jobId": format!("{:#x}", job_id(19)),
        "paymentTxHash": format!("{:#x}", job_id(20)),
        "payload": BASE64.encode(b"original"),
        "signature": BASE64.encode([0u8; 65]),
        "timestamp": support::now_millis(),
    })
    .to_string();
    let request = signed_request(SIGNING_SECRET, signed_body.as_bytes(), "nonce-tamper")
        .body(axum::body::Body::from(signed_body.replace("original", "tampered!")))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
}
