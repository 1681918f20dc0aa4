use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use blobkit_common::{JobStatusResponse, KnownErrorKind, ProxyError};
use blobkit_verifier::JobVerifier;
use ethers::types::H256;
use std::str::FromStr;
use std::sync::Arc;

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ProxyError> {
    let job_id = H256::from_str(&job_id)
        .map_err(|_| ProxyError::new(KnownErrorKind::InvalidRequest, "jobId must be a 0x-prefixed 32-byte hash"))?;

    let job = state
        .verifier
        .get_job(job_id)
        .await
        .map_err(|e| ProxyError::new(KnownErrorKind::ContractError, e.to_string()))?;

    Ok(Json(JobStatusResponse {
        exists: job.user != Default::default(),
        completed: job.completed,
        user: job.user,
        amount: job.amount,
        timestamp: job.timestamp,
        blob_tx_hash: job.blob_tx_hash,
    }))
}
