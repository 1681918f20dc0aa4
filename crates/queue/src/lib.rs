//! Persistent Completion Queue (E): a durable retry queue for `completeJob`
//! calls whose blob has already landed on chain. Backed by `sled`,
//! restructured from the node workspace's `JobQueue` around retry-queue
//! semantics rather than work dispatch.

use async_trait::async_trait;
use blobkit_cache::{Cache, JobLock};
use blobkit_common::PendingCompletion;
use blobkit_verifier::JobVerifier;
use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;

/// Persistent Completion Queue (E) operations, as a trait so
/// `blobkit-proxy` can hold `Arc<dyn CompletionQueueTrait>` in its state
/// and exercise the Write Handler's enqueue-on-failure path against an
/// in-memory double in tests.
#[async_trait]
pub trait CompletionQueueTrait: Send + Sync {
    fn enqueue(&self, job_id: H256, blob_tx_hash: H256, now: u64) -> Result<(), QueueError>;
    fn remove(&self, job_id: H256) -> Result<(), QueueError>;
    fn status(&self) -> Result<QueueStatus, QueueError>;
    async fn drain(&self, now: u64) -> Vec<(H256, Result<(), String>)>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

const KEY_PREFIX: &str = "pending:";

fn entry_key(job_id: H256) -> Vec<u8> {
    let mut key = KEY_PREFIX.as_bytes().to_vec();
    key.extend_from_slice(job_id.as_bytes());
    key
}

/// Releases its held lock when dropped, covering panic-unwind exit paths
/// from the drain loop. Release is fire-and-forget since `Drop` cannot be
/// async; the lock's own PX lease is the backstop if the spawned release
/// never runs.
struct LockGuard {
    cache: Arc<dyn Cache>,
    lock: Option<JobLock>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let cache = self.cache.clone();
            tokio::spawn(async move {
                if let Err(err) = cache.release_lock(&lock).await {
                    tracing::warn!(job_id = ?lock.job_id, error = %err, "failed to release completion lock");
                }
            });
        }
    }
}

pub struct CompletionQueue {
    db: sled::Db,
    cache: Arc<dyn Cache>,
    verifier: Arc<dyn JobVerifier>,
    lock_lease: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub entries: Vec<PendingCompletion>,
}

impl CompletionQueue {
    pub fn open(
        path: &str,
        cache: Arc<dyn Cache>,
        verifier: Arc<dyn JobVerifier>,
        lock_lease: Duration,
    ) -> Result<Self, QueueError> {
        let db = sled::open(path)?;
        Ok(Self {
            db,
            cache,
            verifier,
            lock_lease,
        })
    }

    /// `Enqueue(jobId, blobTxHash)` — idempotent on `jobId`: re-enqueuing a
    /// job already pending leaves its retry state untouched.
    pub fn enqueue(&self, job_id: H256, blob_tx_hash: H256, now: u64) -> Result<(), QueueError> {
        let key = entry_key(job_id);
        if self.db.contains_key(&key)? {
            return Ok(());
        }
        let entry = PendingCompletion::new(job_id, blob_tx_hash, now);
        let bytes = bincode::serialize(&entry)?;
        self.db.insert(key, bytes)?;
        Ok(())
    }

    /// `Remove(jobId)` — idempotent.
    pub fn remove(&self, job_id: H256) -> Result<(), QueueError> {
        self.db.remove(entry_key(job_id))?;
        Ok(())
    }

    fn load(&self, key: &[u8]) -> Result<Option<PendingCompletion>, QueueError> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, entry: &PendingCompletion) -> Result<(), QueueError> {
        let bytes = bincode::serialize(entry)?;
        self.db.insert(entry_key(entry.job_id), bytes)?;
        Ok(())
    }

    /// `Status() -> {pendingCount, entries}`.
    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        let mut entries = Vec::new();
        for item in self.db.scan_prefix(KEY_PREFIX.as_bytes()) {
            let (_, value) = item?;
            entries.push(bincode::deserialize(&value)?);
        }
        Ok(QueueStatus {
            pending_count: entries.len(),
            entries,
        })
    }

    /// `Drain(now)` — iterates due entries, attempting `CompleteJob` for
    /// each under the job's D-lock. Every attempt re-checks completion via
    /// B before calling `CompleteJob`, since another actor may have
    /// already settled it.
    pub async fn drain(&self, now: u64) -> Vec<(H256, Result<(), String>)> {
        let mut due = Vec::new();
        for item in self.db.scan_prefix(KEY_PREFIX.as_bytes()) {
            let Ok((_, value)) = item else { continue };
            let Ok(entry) = bincode::deserialize::<PendingCompletion>(&value) else {
                continue;
            };
            if entry.expired(now) || entry.exhausted() {
                let _ = self.remove(entry.job_id);
                tracing::warn!(job_id = ?entry.job_id, retries = entry.retry_count, "completion abandoned, operator intervention required");
                continue;
            }
            if entry.due(now) {
                due.push(entry);
            }
        }

        let mut results = Vec::with_capacity(due.len());
        for entry in due {
            let outcome = self.attempt(entry, now).await;
            results.push(outcome);
        }
        results
    }

    async fn attempt(&self, mut entry: PendingCompletion, now: u64) -> (H256, Result<(), String>) {
        let job_id = entry.job_id;

        let lock = match self.cache.acquire_lock(job_id, self.lock_lease).await {
            Ok(Some(lock)) => lock,
            Ok(None) => return (job_id, Err("lock held by another worker".to_string())),
            Err(e) => return (job_id, Err(e.to_string())),
        };
        let _guard = LockGuard {
            cache: self.cache.clone(),
            lock: Some(lock),
        };

        let status = match self.verifier.check_job_status(job_id).await {
            Ok(status) => status,
            Err(e) => {
                entry.retry_count = entry.retry_count.saturating_add(1);
                entry.last_attempt_at = now;
                entry.last_error = e.to_string();
                let _ = self.save(&entry);
                return (job_id, Err(e.to_string()));
            }
        };

        if status.completed {
            let _ = self.remove(job_id);
            return (job_id, Ok(()));
        }

        match self.verifier.complete_job(job_id, entry.blob_tx_hash).await {
            Ok(_) => {
                let _ = self.remove(job_id);
                (job_id, Ok(()))
            }
            Err(e) => {
                entry.retry_count = entry.retry_count.saturating_add(1);
                entry.last_attempt_at = now;
                entry.last_error = e.to_string();
                let _ = self.save(&entry);
                (job_id, Err(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl CompletionQueueTrait for CompletionQueue {
    fn enqueue(&self, job_id: H256, blob_tx_hash: H256, now: u64) -> Result<(), QueueError> {
        CompletionQueue::enqueue(self, job_id, blob_tx_hash, now)
    }

    fn remove(&self, job_id: H256) -> Result<(), QueueError> {
        CompletionQueue::remove(self, job_id)
    }

    fn status(&self) -> Result<QueueStatus, QueueError> {
        CompletionQueue::status(self)
    }

    async fn drain(&self, now: u64) -> Vec<(H256, Result<(), String>)> {
        CompletionQueue::drain(self, now).await
    }
}
