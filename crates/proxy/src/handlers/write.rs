//! Write Handler (H): the 11-step orchestration for `POST
//! /api/v1/blob/write`.

use crate::callback::fire_and_forget;
use crate::state::AppState;
use crate::validation::{decode_base64_field, recover_payload_signer, validate_callback_url};
use axum::extract::State;
use axum::Json;
use blobkit_cache::{Cache, JobLock};
use blobkit_common::{KnownErrorKind, ProxyError, WriteRequest, WriteResponse, PENDING_COMPLETION_SENTINEL};
use blobkit_executor::{BlobExecutorTrait, ExecutorError};
use blobkit_queue::CompletionQueueTrait;
use blobkit_verifier::{JobVerifier, VerifierError};
use ethers::types::H256;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

struct LockGuard {
    cache: Arc<dyn Cache>,
    lock: Option<JobLock>,
}

impl LockGuard {
    async fn release(mut self) {
        if let Some(lock) = self.lock.take() {
            if let Err(err) = self.cache.release_lock(&lock).await {
                tracing::warn!(job_id = ?lock.job_id, error = %err, "failed to release write lock");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let cache = self.cache.clone();
            tokio::spawn(async move {
                let _ = cache.release_lock(&lock).await;
            });
        }
    }
}

fn executor_error_to_proxy(err: ExecutorError) -> ProxyError {
    match err {
        ExecutorError::BlobTooLarge => ProxyError::new(KnownErrorKind::BlobTooLarge, "payload does not fit in a blob"),
        ExecutorError::CircuitOpen => {
            ProxyError::new(KnownErrorKind::BlobExecutionFailed, "blob executor circuit is open")
        }
        ExecutorError::Kzg(msg) => ProxyError::new(KnownErrorKind::BlobExecutionFailed, msg),
        ExecutorError::ExecutionFailed(msg) => ProxyError::new(KnownErrorKind::BlobExecutionFailed, msg),
    }
}

fn verifier_error_to_proxy(err: VerifierError) -> ProxyError {
    match err {
        VerifierError::CircuitOpen => ProxyError::new(KnownErrorKind::CircuitOpen, "escrow contract circuit is open"),
        VerifierError::Contract(msg) => ProxyError::new(KnownErrorKind::ContractError, msg),
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub async fn write(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WriteRequest>,
) -> Result<Json<WriteResponse>, ProxyError> {
    let job_id = req.job_id;

    // Step 1: idempotency short-circuit.
    if let Some(cached) = state.cache.get(job_id).await.map_err(|e| {
        ProxyError::new(KnownErrorKind::NetworkError, format!("cache unavailable: {e}"))
    })? {
        return Ok(Json(cached));
    }

    // Step 2: verify escrow payment.
    let verification = state
        .verifier
        .verify_job_payment(job_id, req.payment_tx_hash)
        .await
        .map_err(verifier_error_to_proxy)?;

    if verification.completed {
        return Err(ProxyError::new(
            KnownErrorKind::JobAlreadyCompleted,
            "job is already completed",
        ));
    }
    if !verification.valid {
        return Err(ProxyError::new(KnownErrorKind::PaymentInvalid, "payment is invalid or insufficient"));
    }

    // Step 3: decode payload/signature, recover the payload signer.
    let payload = decode_base64_field("payload", &req.payload)?;
    let signature = decode_base64_field("signature", &req.signature)?;
    let signer_address = recover_payload_signer(&payload, &signature)?;
    if signer_address != verification.user {
        return Err(ProxyError::new(
            KnownErrorKind::SignatureInvalid,
            "payload signer does not match escrow-recorded user",
        ));
    }

    // Step 4: size checks.
    if payload.is_empty() {
        return Err(ProxyError::new(KnownErrorKind::BlobEmpty, "payload is empty"));
    }
    if payload.len() > state.config.max_blob_size {
        return Err(ProxyError::new(KnownErrorKind::BlobTooLarge, "payload exceeds max blob size"));
    }

    // Step 5: acquire the D-lock; every exit path from here releases it.
    let lock = state
        .cache
        .acquire_lock(job_id, Duration::from_secs(60))
        .await
        .map_err(|e| ProxyError::new(KnownErrorKind::NetworkError, format!("cache unavailable: {e}")))?
        .ok_or_else(|| ProxyError::new(KnownErrorKind::JobLocked, "job is locked by another worker"))?;
    let guard = LockGuard {
        cache: state.cache.clone(),
        lock: Some(lock),
    };

    let result = write_locked(&state, &req, job_id, &payload).await;
    guard.release().await;
    result.map(Json)
}

async fn write_locked(
    state: &Arc<AppState>,
    req: &WriteRequest,
    job_id: H256,
    payload: &[u8],
) -> Result<WriteResponse, ProxyError> {
    // Step 6: execute the blob transaction.
    let job_timeout = Duration::from_secs(state.config.job_timeout);
    let receipt = state
        .executor
        .execute_blob(payload, job_timeout)
        .await
        .map_err(executor_error_to_proxy)?;

    // Step 7: blob submission metrics.
    tracing::info!(
        job_id = ?job_id,
        size = payload.len(),
        codec = req.meta.codec.as_deref().unwrap_or("application/octet-stream"),
        "blob submitted"
    );

    // Step 8: settle the escrow, falling back to the completion queue.
    let completion_tx_hash = match state.verifier.complete_job(job_id, receipt.blob_tx_hash).await {
        Ok(hash) => format!("{hash:#x}"),
        Err(err) => {
            tracing::warn!(job_id = ?job_id, error = %err, "completeJob failed, enqueueing for retry");
            if let Err(enqueue_err) = state.queue.enqueue(job_id, receipt.blob_tx_hash, now_secs()) {
                tracing::error!(job_id = ?job_id, error = %enqueue_err, "failed to enqueue completion retry");
            }
            PENDING_COMPLETION_SENTINEL.to_string()
        }
    };

    // Step 9: assemble and cache the response.
    let response = WriteResponse {
        success: true,
        job_id,
        blob_tx_hash: receipt.blob_tx_hash,
        block_number: receipt.block_number,
        blob_hash: receipt.blob_hash,
        commitment: receipt.commitment,
        proof: receipt.proof,
        blob_index: receipt.blob_index,
        completion_tx_hash,
    };
    if let Err(err) = state.cache.set(job_id, &response).await {
        tracing::warn!(job_id = ?job_id, error = %err, "failed to cache write response");
    }

    // Step 10: best-effort callback.
    if let Some(raw_callback) = &req.meta.callback_url {
        if let Some(url) = validate_callback_url(raw_callback) {
            let body = serde_json::to_value(&response).unwrap_or_default();
            fire_and_forget(url, body, format!("{job_id:#x}"));
        } else {
            tracing::warn!(job_id = ?job_id, "ignoring invalid callback url");
        }
    }

    Ok(response)
}
