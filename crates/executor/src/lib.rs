pub mod blob;
pub mod fees;
pub mod tx;

use async_trait::async_trait;
use blob::{commit, BlobError, EncodedBlob};
use blobkit_breaker::{BreakerError, CircuitBreaker};
use blobkit_common::BlobReceipt;
use blobkit_signer::Signer;
use c_kzg::KzgSettings;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, H256, U256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tx::Eip4844Request;

/// Blob Executor (C) operation, as a trait so the proxy's Write Handler can
/// run against a fake executor in tests instead of a live chain.
#[async_trait]
pub trait BlobExecutorTrait: Send + Sync {
    async fn execute_blob(&self, payload: &[u8], job_timeout: Duration) -> Result<BlobReceipt, ExecutorError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("payload does not fit in a blob")]
    BlobTooLarge,
    #[error("kzg commitment failed: {0}")]
    Kzg(String),
    #[error("circuit open")]
    CircuitOpen,
    #[error("blob execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<BlobError> for ExecutorError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::TooLarge(_) => ExecutorError::BlobTooLarge,
            BlobError::Kzg(msg) => ExecutorError::Kzg(msg),
        }
    }
}

impl<E: std::fmt::Display> From<BreakerError<E>> for ExecutorError {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open => ExecutorError::CircuitOpen,
            BreakerError::Inner(e) => ExecutorError::ExecutionFailed(e.to_string()),
        }
    }
}

/// Blob Executor (C): constructs and sends a type-3 transaction carrying
/// one blob, its KZG commitment and proof, and waits for inclusion.
pub struct BlobExecutor {
    provider: Arc<Provider<Http>>,
    kzg_settings: Arc<KzgSettings>,
    breaker: Arc<CircuitBreaker>,
    signer: Arc<dyn Signer>,
    chain_id: u64,
    max_fee_per_gas_ceiling: U256,
}

impl BlobExecutor {
    pub fn new(
        provider: Arc<Provider<Http>>,
        trusted_setup_path: &Path,
        breaker: Arc<CircuitBreaker>,
        signer: Arc<dyn Signer>,
        chain_id: u64,
        max_fee_per_gas_ceiling: U256,
    ) -> anyhow::Result<Self> {
        let kzg_settings = KzgSettings::load_trusted_setup_file(trusted_setup_path)
            .map_err(|e| anyhow::anyhow!("failed to load kzg trusted setup: {e:?}"))?;
        Ok(Self {
            provider,
            kzg_settings: Arc::new(kzg_settings),
            breaker,
            signer,
            chain_id,
            max_fee_per_gas_ceiling,
        })
    }

    /// `ExecuteBlob(job, traceCtx) -> BlobReceipt`, per the 6-step
    /// algorithm: encode, commit, estimate fees, build, sign+broadcast,
    /// await receipt.
    pub async fn execute_blob(
        &self,
        payload: &[u8],
        job_timeout: Duration,
    ) -> Result<BlobReceipt, ExecutorError> {
        let encoded = EncodedBlob::encode(payload)?;
        let commitment = commit(&encoded, &self.kzg_settings)?;

        let provider = self.provider.clone();
        let signer = self.signer.clone();
        let chain_id = self.chain_id;
        let max_fee_ceiling = self.max_fee_per_gas_ceiling;
        let from = signer.address();

        self.breaker
            .call(|| async move {
                let fee_estimate = fees::estimate(&provider)
                    .await
                    .map_err(|e| e.to_string())?;
                let max_fee_per_gas = fee_estimate.max_fee_per_gas.min(max_fee_ceiling);

                let nonce = provider
                    .get_transaction_count(from, None)
                    .await
                    .map_err(|e| e.to_string())?;

                let request = Eip4844Request {
                    chain_id,
                    nonce,
                    max_priority_fee_per_gas: fee_estimate.max_priority_fee_per_gas,
                    max_fee_per_gas,
                    gas_limit: U256::from(21_000u64),
                    to: Address::zero(),
                    value: U256::zero(),
                    data: Default::default(),
                    max_fee_per_blob_gas: fee_estimate.max_fee_per_blob_gas,
                    blob_versioned_hashes: vec![commitment.versioned_hash],
                };

                let raw = request
                    .sign_and_wrap(&signer, &encoded, &commitment.commitment, &commitment.proof)
                    .await
                    .map_err(|e| e.to_string())?;

                let pending = provider
                    .send_raw_transaction(raw)
                    .await
                    .map_err(|e| e.to_string())?;
                let blob_tx_hash = pending.tx_hash();

                let receipt = timeout(job_timeout, pending)
                    .await
                    .map_err(|_| "timed out waiting for blob transaction receipt".to_string())?
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| "blob transaction dropped from mempool".to_string())?;

                if receipt.status != Some(1.into()) {
                    return Err("blob transaction reverted".to_string());
                }

                Ok(BlobReceipt {
                    blob_tx_hash,
                    block_number: receipt.block_number.map(|n| n.as_u64()).unwrap_or_default(),
                    blob_hash: commitment.versioned_hash,
                    commitment: hex::encode(commitment.commitment),
                    proof: hex::encode(commitment.proof),
                    blob_index: 0,
                })
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl BlobExecutorTrait for BlobExecutor {
    async fn execute_blob(&self, payload: &[u8], job_timeout: Duration) -> Result<BlobReceipt, ExecutorError> {
        BlobExecutor::execute_blob(self, payload, job_timeout).await
    }
}

/// Bounded receipt-polling loop used when a provider does not support the
/// pending-transaction watcher directly (kept for callers reconciling a
/// broadcast-but-unconfirmed blob transaction from the completion queue).
pub async fn poll_for_receipt(
    provider: &Provider<Http>,
    tx_hash: H256,
    deadline: Duration,
) -> Result<Option<u64>, ExecutorError> {
    let start = Instant::now();
    loop {
        if let Ok(Some(receipt)) = provider.get_transaction_receipt(tx_hash).await {
            if receipt.status == Some(1.into()) {
                return Ok(receipt.block_number.map(|n| n.as_u64()));
            }
            return Err(ExecutorError::ExecutionFailed("transaction reverted".into()));
        }
        if start.elapsed() >= deadline {
            return Ok(None);
        }
        sleep(Duration::from_secs(2)).await;
    }
}
