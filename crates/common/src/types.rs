use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A job as observed through the escrow's `getJobDetails` view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: H256,
    pub user: Address,
    pub payment_tx_hash: H256,
    pub amount: U256,
    pub timestamp: u64,
    pub completed: bool,
    pub blob_tx_hash: H256,
}

/// Result of `PaymentVerifier::verify_job_payment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentVerification {
    pub valid: bool,
    pub exists: bool,
    pub completed: bool,
    pub user: Address,
    pub amount: U256,
    pub is_expired: bool,
}

/// Result of `PaymentVerifier::check_job_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub exists: bool,
    pub completed: bool,
    pub valid: bool,
    pub is_expired: bool,
}

/// A blob that landed on chain but whose escrow completion call must be retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCompletion {
    pub job_id: H256,
    pub blob_tx_hash: H256,
    pub last_attempt_at: u64,
    pub retry_count: u8,
    pub last_error: String,
}

impl PendingCompletion {
    pub const MAX_RETRIES: u8 = 10;
    pub const TTL_SECS: u64 = 24 * 60 * 60;

    pub fn new(job_id: H256, blob_tx_hash: H256, now: u64) -> Self {
        Self {
            job_id,
            blob_tx_hash,
            last_attempt_at: now,
            retry_count: 0,
            last_error: String::new(),
        }
    }

    /// `backoff(n) = min(base * 2^n, 5 min)`, `base = 30s`.
    pub fn backoff_secs(retry_count: u8) -> u64 {
        const BASE: u64 = 30;
        const CAP: u64 = 5 * 60;
        BASE.saturating_mul(1u64 << retry_count.min(20)).min(CAP)
    }

    pub fn due(&self, now: u64) -> bool {
        now.saturating_sub(self.last_attempt_at) >= Self::backoff_secs(self.retry_count)
    }

    pub fn expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_attempt_at) > Self::TTL_SECS
    }

    pub fn exhausted(&self) -> bool {
        self.retry_count >= Self::MAX_RETRIES
    }
}

/// Receipt returned by the Blob Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobReceipt {
    pub blob_tx_hash: H256,
    pub block_number: u64,
    pub blob_hash: H256,
    pub commitment: String,
    pub proof: String,
    pub blob_index: u32,
}

/// `meta` object accompanying a write request. Unknown fields are captured
/// in `extra` rather than rejected, except in HMAC-signed canonicalization
/// mode where the request struct instead derives `deny_unknown_fields`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteMeta {
    #[serde(default, rename = "appId")]
    pub app_id: Option<String>,
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default, rename = "contentHash")]
    pub content_hash: Option<H256>,
    #[serde(default, rename = "ttlBlocks")]
    pub ttl_blocks: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, rename = "contentType")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "callbackUrl")]
    pub callback_url: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

/// `POST /api/v1/blob/write` request body. `deny_unknown_fields` keeps the
/// HMAC-canonicalized body stable: an attacker cannot append an ignored
/// field to a replayed request and still pass signature verification,
/// since the extra field now fails deserialization entirely.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteRequest {
    #[serde(rename = "jobId")]
    pub job_id: H256,
    #[serde(rename = "paymentTxHash")]
    pub payment_tx_hash: H256,
    pub payload: String,
    pub signature: String,
    #[serde(default)]
    pub meta: WriteMeta,
    pub timestamp: u64,
}

/// `POST /api/v1/blob/write` response body (200 OK).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteResponse {
    pub success: bool,
    #[serde(rename = "jobId")]
    pub job_id: H256,
    #[serde(rename = "blobTxHash")]
    pub blob_tx_hash: H256,
    #[serde(rename = "blockNumber")]
    pub block_number: u64,
    #[serde(rename = "blobHash")]
    pub blob_hash: H256,
    pub commitment: String,
    pub proof: String,
    #[serde(rename = "blobIndex")]
    pub blob_index: u32,
    #[serde(rename = "completionTxHash")]
    pub completion_tx_hash: String,
}

/// `GET /api/v1/job/:jobId` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub exists: bool,
    pub completed: bool,
    pub user: Address,
    pub amount: U256,
    pub timestamp: u64,
    #[serde(rename = "blobTxHash")]
    pub blob_tx_hash: H256,
}

/// Overall health status reported at `/api/v1/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub const PENDING_COMPLETION_SENTINEL: &str = "pending";
