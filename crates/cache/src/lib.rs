//! Job Cache (D): Redis-backed idempotency store and distributed lock,
//! mirroring the node workspace's reliance on a single shared store for
//! both concerns rather than splitting them across two services.

use async_trait::async_trait;
use blobkit_breaker::{BreakerError, CircuitBreaker};
use blobkit_common::WriteResponse;
use ethers::types::H256;
use rand::RngCore;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;

/// Job Cache (D) operations, as a trait so the proxy's Write Handler and
/// the completion queue's drain loop can run against an in-memory fake
/// store in tests instead of live Redis.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, job_id: H256) -> Result<Option<WriteResponse>, CacheError>;
    async fn set(&self, job_id: H256, result: &WriteResponse) -> Result<(), CacheError>;
    async fn acquire_lock(&self, job_id: H256, lease: Duration) -> Result<Option<JobLock>, CacheError>;
    async fn release_lock(&self, lock: &JobLock) -> Result<(), CacheError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("circuit open")]
    CircuitOpen,
    #[error("redis error: {0}")]
    Redis(String),
}

impl<E: std::fmt::Display> From<BreakerError<E>> for CacheError {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open => CacheError::CircuitOpen,
            BreakerError::Inner(e) => CacheError::Redis(e.to_string()),
        }
    }
}

const RESULT_KEY_PREFIX: &str = "blobkit:result:";
const LOCK_KEY_PREFIX: &str = "blobkit:lock:";
pub const CACHE_RESULT_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_LOCK_LEASE_MS: u64 = 60_000;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

fn result_key(job_id: H256) -> String {
    format!("{RESULT_KEY_PREFIX}{job_id:#x}")
}

fn lock_key(job_id: H256) -> String {
    format!("{LOCK_KEY_PREFIX}{job_id:#x}")
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// An acquired distributed lock. Carries its own token so the holder is the
/// only party that can release it.
#[derive(Debug, Clone)]
pub struct JobLock {
    pub job_id: H256,
    pub token: String,
}

pub struct JobCache {
    conn: ConnectionManager,
    breaker: Arc<CircuitBreaker>,
}

impl JobCache {
    pub async fn connect(redis_url: &str, breaker: Arc<CircuitBreaker>) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, breaker })
    }

    /// `Get(jobId) -> CachedResult | None`. Fails closed (returns an error
    /// rather than `None`) when the breaker is open, so a caller never
    /// mistakes "store unreachable" for "no prior result".
    pub async fn get(&self, job_id: H256) -> Result<Option<WriteResponse>, CacheError> {
        let mut conn = self.conn.clone();
        let key = result_key(job_id);
        self.breaker
            .call(|| async move {
                let raw: Option<String> = conn.get(&key).await.map_err(|e| e.to_string())?;
                match raw {
                    Some(json) => serde_json::from_str(&json)
                        .map(Some)
                        .map_err(|e| e.to_string()),
                    None => Ok(None),
                }
            })
            .await
            .map_err(Into::into)
    }

    /// `Set(jobId, result, ttl)` — written only after terminal success.
    pub async fn set(&self, job_id: H256, result: &WriteResponse) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = result_key(job_id);
        let payload = serde_json::to_string(result).map_err(|e| CacheError::Redis(e.to_string()))?;
        self.breaker
            .call(|| async move {
                conn.set_ex::<_, _, ()>(&key, payload, CACHE_RESULT_TTL_SECS)
                    .await
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(Into::into)
    }

    /// `AcquireLock(jobId) -> token | None`, `SET key token NX PX ttl_ms`.
    pub async fn acquire_lock(&self, job_id: H256, lease: Duration) -> Result<Option<JobLock>, CacheError> {
        let mut conn = self.conn.clone();
        let key = lock_key(job_id);
        let token = random_token();
        let ttl_ms = lease.as_millis() as u64;

        let acquired = self
            .breaker
            .call(|| {
                let token = token.clone();
                async move {
                    let result: Option<String> = redis::cmd("SET")
                        .arg(&key)
                        .arg(&token)
                        .arg("NX")
                        .arg("PX")
                        .arg(ttl_ms)
                        .query_async(&mut conn)
                        .await
                        .map_err(|e| e.to_string())?;
                    Ok::<bool, String>(result.is_some())
                }
            })
            .await?;

        Ok(acquired.then_some(JobLock { job_id, token }))
    }

    /// `ReleaseLock(jobId, token)` — releases only if the stored token
    /// still matches, via a Lua script so the compare-and-delete is atomic.
    pub async fn release_lock(&self, lock: &JobLock) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = lock_key(lock.job_id);
        let token = lock.token.clone();
        self.breaker
            .call(|| async move {
                redis::Script::new(RELEASE_LOCK_SCRIPT)
                    .key(key)
                    .arg(token)
                    .invoke_async::<_, i32>(&mut conn)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl Cache for JobCache {
    async fn get(&self, job_id: H256) -> Result<Option<WriteResponse>, CacheError> {
        JobCache::get(self, job_id).await
    }

    async fn set(&self, job_id: H256, result: &WriteResponse) -> Result<(), CacheError> {
        JobCache::set(self, job_id, result).await
    }

    async fn acquire_lock(&self, job_id: H256, lease: Duration) -> Result<Option<JobLock>, CacheError> {
        JobCache::acquire_lock(self, job_id, lease).await
    }

    async fn release_lock(&self, lock: &JobLock) -> Result<(), CacheError> {
        JobCache::release_lock(self, lock).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_key_is_namespaced_and_stable() {
        let job_id = H256::repeat_byte(0xab);
        let a = result_key(job_id);
        let b = result_key(job_id);
        assert_eq!(a, b);
        assert!(a.starts_with(RESULT_KEY_PREFIX));
    }

    #[test]
    fn lock_key_differs_from_result_key() {
        let job_id = H256::repeat_byte(1);
        assert_ne!(lock_key(job_id), result_key(job_id));
    }

    #[test]
    fn random_tokens_are_not_trivially_equal() {
        assert_ne!(random_token(), random_token());
    }
}
