//! Fake B/C/D/E doubles and request-building helpers shared by the HTTP
//! integration tests, mirroring the trait seam the `Signer` component
//! already established.

use async_trait::async_trait;
use blobkit_breaker::BreakerRegistry;
use blobkit_cache::{Cache, CacheError, JobLock};
use blobkit_common::{BlobReceipt, Job, JobStatus, PaymentVerification, ProxyConfig, WriteResponse};
use blobkit_executor::{BlobExecutorTrait, ExecutorError};
use blobkit_proxy::state::{AppState, Metrics};
use blobkit_queue::{CompletionQueueTrait, QueueError, QueueStatus};
use blobkit_signer::{RawKeySigner, Signer};
use blobkit_verifier::{JobVerifier, VerifierError};
use ethers::providers::{Http, Provider};
use ethers::types::{Address, H256, U256};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const SIGNING_SECRET: &str = "integration-test-signing-secret!!";
pub const TEST_PRIVATE_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// The escrow-recorded outcome a [`FakeVerifier`] should report for
/// `verify_job_payment`/`check_job_status`.
#[derive(Clone)]
pub struct JobFixture {
    pub user: Address,
    pub amount: U256,
    pub valid: bool,
    pub completed: bool,
    pub is_expired: bool,
}

pub struct FakeVerifier {
    pub job: Mutex<JobFixture>,
    pub complete_job_result: Mutex<Result<H256, String>>,
    pub complete_job_calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn new(job: JobFixture) -> Self {
        Self {
            job: Mutex::new(job),
            complete_job_result: Mutex::new(Ok(H256::repeat_byte(0xcc))),
            complete_job_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_completion(job: JobFixture) -> Self {
        Self {
            job: Mutex::new(job),
            complete_job_result: Mutex::new(Err("escrow rpc unavailable".to_string())),
            complete_job_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl JobVerifier for FakeVerifier {
    async fn verify_job_payment(&self, _job_id: H256, _payment_tx_hash: H256) -> Result<PaymentVerification, VerifierError> {
        let job = self.job.lock().unwrap().clone();
        Ok(PaymentVerification {
            valid: job.valid,
            exists: true,
            completed: job.completed,
            user: job.user,
            amount: job.amount,
            is_expired: job.is_expired,
        })
    }

    async fn check_job_status(&self, _job_id: H256) -> Result<JobStatus, VerifierError> {
        let job = self.job.lock().unwrap().clone();
        Ok(JobStatus {
            exists: true,
            completed: job.completed,
            valid: job.valid,
            is_expired: job.is_expired,
        })
    }

    async fn get_job(&self, job_id: H256) -> Result<Job, VerifierError> {
        let job = self.job.lock().unwrap().clone();
        Ok(Job {
            job_id,
            user: job.user,
            payment_tx_hash: H256::zero(),
            amount: job.amount,
            timestamp: 0,
            completed: job.completed,
            blob_tx_hash: H256::zero(),
        })
    }

    async fn complete_job(&self, job_id: H256, _blob_tx_hash: H256) -> Result<H256, VerifierError> {
        self.complete_job_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.complete_job_result.lock().unwrap() {
            Ok(hash) => Ok(*hash),
            Err(msg) => Err(VerifierError::Contract(format!("{msg} ({job_id:#x})"))),
        }
    }
}

pub struct FakeExecutor {
    pub result: Result<BlobReceipt, String>,
}

impl FakeExecutor {
    pub fn succeeding() -> Self {
        Self {
            result: Ok(BlobReceipt {
                blob_tx_hash: H256::repeat_byte(0xab),
                block_number: 42,
                blob_hash: H256::repeat_byte(0x11),
                commitment: "c0ffee".to_string(),
                proof: "facade".to_string(),
                blob_index: 0,
            }),
        }
    }
}

#[async_trait]
impl BlobExecutorTrait for FakeExecutor {
    async fn execute_blob(&self, _payload: &[u8], _job_timeout: Duration) -> Result<BlobReceipt, ExecutorError> {
        self.result
            .clone()
            .map_err(ExecutorError::ExecutionFailed)
    }
}

#[derive(Default)]
pub struct FakeCache {
    results: Mutex<HashMap<H256, WriteResponse>>,
    locks: Mutex<HashMap<H256, String>>,
    pub deny_lock: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl Cache for FakeCache {
    async fn get(&self, job_id: H256) -> Result<Option<WriteResponse>, CacheError> {
        Ok(self.results.lock().unwrap().get(&job_id).cloned())
    }

    async fn set(&self, job_id: H256, result: &WriteResponse) -> Result<(), CacheError> {
        self.results.lock().unwrap().insert(job_id, result.clone());
        Ok(())
    }

    async fn acquire_lock(&self, job_id: H256, _lease: Duration) -> Result<Option<JobLock>, CacheError> {
        if self.deny_lock.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let mut locks = self.locks.lock().unwrap();
        if locks.contains_key(&job_id) {
            return Ok(None);
        }
        let token = "test-token".to_string();
        locks.insert(job_id, token.clone());
        Ok(Some(JobLock { job_id, token }))
    }

    async fn release_lock(&self, lock: &JobLock) -> Result<(), CacheError> {
        self.locks.lock().unwrap().remove(&lock.job_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeQueue {
    pub enqueued: Mutex<Vec<(H256, H256)>>,
}

#[async_trait]
impl CompletionQueueTrait for FakeQueue {
    fn enqueue(&self, job_id: H256, blob_tx_hash: H256, _now: u64) -> Result<(), QueueError> {
        self.enqueued.lock().unwrap().push((job_id, blob_tx_hash));
        Ok(())
    }

    fn remove(&self, _job_id: H256) -> Result<(), QueueError> {
        Ok(())
    }

    fn status(&self) -> Result<QueueStatus, QueueError> {
        Ok(QueueStatus { pending_count: 0, entries: Vec::new() })
    }

    async fn drain(&self, _now: u64) -> Vec<(H256, Result<(), String>)> {
        Vec::new()
    }
}

fn test_config() -> ProxyConfig {
    ProxyConfig {
        port: 3000,
        host: "0.0.0.0".into(),
        rpc_url: "http://localhost:8545".into(),
        chain_id: 1,
        escrow_contract: "0x1111111111111111111111111111111111111111".into(),
        signer_backend: "raw".into(),
        private_key: Some(TEST_PRIVATE_KEY.into()),
        kms_endpoint: None,
        proxy_fee_percent: 0,
        max_blob_size: 131_072,
        rate_limit_requests: 1000,
        rate_limit_window: 60,
        job_timeout: 300,
        request_signing_secret: SIGNING_SECRET.to_string(),
        kzg_trusted_setup_path: "/tmp/setup.txt".into(),
        redis_url: "redis://localhost:6379".into(),
        queue_db_path: "./q.db".into(),
        http_proxy_count: 0,
        log_level: "info".into(),
        cors_origin: "*".into(),
    }
}

/// The address `TEST_PRIVATE_KEY` recovers to, for fixtures that need to
/// set the escrow-recorded `user` before the state (and its signer) exist.
pub fn test_signer_address() -> Address {
    RawKeySigner::new(TEST_PRIVATE_KEY, 1).unwrap().address()
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub executor_signer: Arc<RawKeySigner>,
}

/// Wires an [`AppState`] from fakes for B/C/D/E, leaving A (the signer)
/// and the circuit breakers real since both are pure in-process logic.
pub fn build_state(verifier: FakeVerifier, executor: FakeExecutor, cache: FakeCache, queue: FakeQueue) -> Harness {
    let signer = Arc::new(RawKeySigner::new(TEST_PRIVATE_KEY, 1).unwrap());
    let provider = Arc::new(Provider::<Http>::try_from("http://localhost:8545").unwrap());

    let state = Arc::new(AppState {
        config: test_config(),
        signer: signer.clone() as Arc<dyn Signer>,
        verifier: Arc::new(verifier) as Arc<dyn JobVerifier>,
        executor: Arc::new(executor) as Arc<dyn BlobExecutorTrait>,
        cache: Arc::new(cache) as Arc<dyn Cache>,
        queue: Arc::new(queue) as Arc<dyn CompletionQueueTrait>,
        breakers: Arc::new(BreakerRegistry::new()),
        provider,
        metrics: Arc::new(Metrics::new().unwrap()),
        limiter: blobkit_proxy::middleware::rate_limit::build_limiter(1000, 60),
        started_at: Instant::now(),
    });

    Harness { state, executor_signer: signer }
}

/// Signs `payload` the way a blob-writing client does: an Ethereum
/// personal-message signature recoverable against the escrow-recorded user.
pub async fn sign_payload(signer: &RawKeySigner, payload: &[u8]) -> Vec<u8> {
    signer.sign_message(payload).await.unwrap().to_vec()
}

/// Computes the `x-blobkit-signature` HMAC the same way
/// `middleware::signature::compute_signature` does, since that function is
/// private to the handler pipeline.
pub fn hmac_signature(secret: &str, timestamp: i64, nonce: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}:{nonce}:").as_bytes());
    mac.update(body);
    format!("v1:{}", hex::encode(mac.finalize().into_bytes()))
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

pub fn signed_request(
    secret: &str,
    body: &[u8],
    nonce: &str,
) -> axum::http::request::Builder {
    let timestamp = now_millis();
    let signature = hmac_signature(secret, timestamp, nonce, body);
    axum::http::Request::builder()
        .method("POST")
        .uri("/api/v1/blob/write")
        .header("content-type", "application/json")
        .header("x-blobkit-signature", signature)
        .header("x-blobkit-timestamp", timestamp.to_string())
        .header("x-blobkit-nonce", nonce)
}
