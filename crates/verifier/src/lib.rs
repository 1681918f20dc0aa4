pub mod contracts;
pub mod eip1559;
pub mod retry;

use async_trait::async_trait;
use blobkit_breaker::{BreakerError, CircuitBreaker};
use blobkit_common::{Job, JobStatus, PaymentVerification};
use blobkit_signer::Signer;
use contracts::BlobEscrow;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, H256, U256};
use eip1559::Eip1559Request;
use retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Payment Verifier (B) operations, as a trait so the proxy's Write Handler
/// can run against a fake escrow in tests instead of a live chain.
#[async_trait]
pub trait JobVerifier: Send + Sync {
    async fn verify_job_payment(
        &self,
        job_id: H256,
        payment_tx_hash: H256,
    ) -> Result<PaymentVerification, VerifierError>;

    async fn check_job_status(&self, job_id: H256) -> Result<JobStatus, VerifierError>;

    async fn get_job(&self, job_id: H256) -> Result<Job, VerifierError>;

    async fn complete_job(&self, job_id: H256, blob_tx_hash: H256) -> Result<H256, VerifierError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("circuit open")]
    CircuitOpen,
    #[error("contract error: {0}")]
    Contract(String),
}

impl<E: std::fmt::Display> From<BreakerError<E>> for VerifierError {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open => VerifierError::CircuitOpen,
            BreakerError::Inner(e) => VerifierError::Contract(e.to_string()),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Payment Verifier (B): confirms escrow deposits and settles jobs via
/// `completeJob`. All reads and writes flow through the `escrow-contract`
/// circuit breaker and a bounded exponential-backoff retry.
pub struct PaymentVerifier {
    read_contract: BlobEscrow<Provider<Http>>,
    provider: Arc<Provider<Http>>,
    breaker: Arc<CircuitBreaker>,
    signer: Arc<dyn Signer>,
    chain_id: u64,
    escrow_address: Address,
    retry_config: RetryConfig,
}

impl PaymentVerifier {
    pub fn new(
        provider: Arc<Provider<Http>>,
        escrow_address: Address,
        breaker: Arc<CircuitBreaker>,
        signer: Arc<dyn Signer>,
        chain_id: u64,
    ) -> Self {
        let read_contract = BlobEscrow::new(escrow_address, provider.clone());
        Self {
            read_contract,
            provider,
            breaker,
            signer,
            chain_id,
            escrow_address,
            retry_config: RetryConfig::default(),
        }
    }

    async fn job_timeout(&self) -> Result<U256, VerifierError> {
        let contract = self.read_contract.clone();
        self.breaker
            .call(|| {
                let contract = contract.clone();
                let cfg = self.retry_config;
                async move {
                    retry_with_backoff(
                        || async { contract.get_job_timeout().call().await.map_err(|e| e.to_string()) },
                        &cfg,
                    )
                    .await
                }
            })
            .await
            .map_err(Into::into)
    }

    async fn get_job_details(&self, job_id: H256) -> Result<(Address, U256, U256, bool, [u8; 32], [u8; 32]), VerifierError> {
        let contract = self.read_contract.clone();
        let job_id_bytes = job_id.to_fixed_bytes();
        self.breaker
            .call(|| {
                let contract = contract.clone();
                let cfg = self.retry_config;
                async move {
                    retry_with_backoff(
                        || async {
                            contract
                                .get_job_details(job_id_bytes)
                                .call()
                                .await
                                .map_err(|e| e.to_string())
                        },
                        &cfg,
                    )
                    .await
                }
            })
            .await
            .map_err(Into::into)
    }

    /// `deposit receipt has status=success`, per spec.md 4.2.
    async fn payment_receipt_successful(&self, payment_tx_hash: H256) -> Result<bool, VerifierError> {
        let provider = self.provider.clone();
        let cfg = self.retry_config;
        self.breaker
            .call(|| {
                let provider = provider.clone();
                async move {
                    retry_with_backoff(
                        || async {
                            provider
                                .get_transaction_receipt(payment_tx_hash)
                                .await
                                .map_err(|e| e.to_string())
                        },
                        &cfg,
                    )
                    .await
                }
            })
            .await
            .map(|receipt| matches!(receipt, Some(r) if r.status == Some(1.into())))
            .map_err(Into::into)
    }

    /// Whether `amount` falls short of a single-blob transaction's
    /// estimated total cost (blob gas + execution gas), per spec.md 8
    /// scenario 4 ("insufficient deposit").
    async fn cost_insufficient(&self, amount: U256) -> Result<bool, VerifierError> {
        let provider = self.provider.clone();
        let estimate = self
            .breaker
            .call(|| {
                let provider = provider.clone();
                async move {
                    blobkit_executor::fees::estimate(&provider)
                        .await
                        .map_err(|e| e.to_string())
                }
            })
            .await?;

        Ok(amount < estimated_blob_tx_cost(&estimate))
    }

    /// `VerifyJobPayment(jobId, paymentTxHash)`.
    pub async fn verify_job_payment(
        &self,
        job_id: H256,
        payment_tx_hash: H256,
    ) -> Result<PaymentVerification, VerifierError> {
        let (user, amount, timestamp, completed, _blob_tx_hash, recorded_payment_tx_hash) =
            self.get_job_details(job_id).await?;

        let exists = user != Address::zero();
        let timeout = self.job_timeout().await?;
        let age = now_secs().saturating_sub(timestamp.as_u64());
        let is_expired = exists && age > timeout.as_u64();

        // spec.md 4.2: `valid` requires the wire-provided paymentTxHash to
        // match the one the escrow recorded, a successful deposit receipt,
        // and a deposit that covers the blob tx's estimated cost, on top of
        // the existence/non-terminal/non-zero-amount basics.
        let basics_hold = exists
            && !completed
            && amount > U256::zero()
            && payment_tx_hash != H256::zero()
            && payment_tx_hash.to_fixed_bytes() == recorded_payment_tx_hash;

        let valid = basics_hold
            && self.payment_receipt_successful(payment_tx_hash).await?
            && !self.cost_insufficient(amount).await?;

        Ok(PaymentVerification {
            valid,
            exists,
            completed,
            user,
            amount,
            is_expired,
        })
    }

    /// `CheckJobStatus(jobId)` -- the lighter variant used by the retry queue.
    pub async fn check_job_status(&self, job_id: H256) -> Result<JobStatus, VerifierError> {
        let (user, amount, timestamp, completed, ..) = self.get_job_details(job_id).await?;
        let exists = user != Address::zero();
        let timeout = self.job_timeout().await?;
        let age = now_secs().saturating_sub(timestamp.as_u64());
        let is_expired = exists && age > timeout.as_u64();
        let valid = exists && amount > U256::zero();

        Ok(JobStatus {
            exists,
            completed,
            valid,
            is_expired,
        })
    }

    /// Full job view as recorded by the escrow, for the job-status endpoint.
    pub async fn get_job(&self, job_id: H256) -> Result<Job, VerifierError> {
        let (user, amount, timestamp, completed, blob_tx_hash, recorded_payment_tx_hash) =
            self.get_job_details(job_id).await?;
        Ok(Job {
            job_id,
            user,
            payment_tx_hash: H256::from(recorded_payment_tx_hash),
            amount,
            timestamp: timestamp.as_u64(),
            completed,
            blob_tx_hash: H256::from(blob_tx_hash),
        })
    }

    /// `CompleteJob(jobId, blobTxHash, signer)` -- sends the escrow's
    /// `completeJob` call signed by the proxy's signer, waits for
    /// inclusion, and returns the transaction hash.
    pub async fn complete_job(&self, job_id: H256, blob_tx_hash: H256) -> Result<H256, VerifierError> {
        let contract = self.read_contract.clone();
        let job_id_bytes = job_id.to_fixed_bytes();
        let blob_hash_bytes = blob_tx_hash.to_fixed_bytes();
        let data = contract
            .complete_job(job_id_bytes, blob_hash_bytes)
            .calldata()
            .expect("completeJob encoding never fails for a well-formed ABI call")
            .clone();

        let provider = self.provider.clone();
        let signer = self.signer.clone();
        let from = signer.address();
        let to = self.escrow_address;
        let chain_id = self.chain_id;

        self.breaker
            .call(|| {
                let provider = provider.clone();
                let signer = signer.clone();
                let data = data.clone();
                let cfg = self.retry_config;
                async move {
                    retry_with_backoff(
                        || {
                            let provider = provider.clone();
                            let signer = signer.clone();
                            let data = data.clone();
                            async move {
                                let nonce = provider
                                    .get_transaction_count(from, None)
                                    .await
                                    .map_err(|e| e.to_string())?;
                                let (max_fee, max_priority_fee) = fee_estimate(&provider)
                                    .await
                                    .map_err(|e| e.to_string())?;

                                let request = Eip1559Request {
                                    chain_id,
                                    nonce,
                                    max_priority_fee_per_gas: max_priority_fee,
                                    max_fee_per_gas: max_fee,
                                    gas_limit: U256::from(150_000u64),
                                    to,
                                    value: U256::zero(),
                                    data: data.clone(),
                                };

                                let raw = request.sign(&signer).await.map_err(|e| e.to_string())?;
                                let pending = provider
                                    .send_raw_transaction(raw)
                                    .await
                                    .map_err(|e| e.to_string())?;
                                let receipt = pending
                                    .await
                                    .map_err(|e| e.to_string())?
                                    .ok_or_else(|| "completeJob tx dropped".to_string())?;

                                if receipt.status != Some(1.into()) {
                                    return Err("completeJob transaction reverted".to_string());
                                }
                                Ok(receipt.transaction_hash)
                            }
                        },
                        &cfg,
                    )
                    .await
                }
            })
            .await
            .map_err(Into::into)
    }
}

/// Blob gas cost plus a nominal 21,000-gas execution cost, matching the
/// `gas_limit` the Blob Executor uses for the carrier transaction.
fn estimated_blob_tx_cost(estimate: &blobkit_executor::fees::BlobFeeEstimate) -> U256 {
    estimate
        .max_fee_per_blob_gas
        .saturating_mul(U256::from(blobkit_executor::fees::GAS_PER_BLOB))
        .saturating_add(estimate.max_fee_per_gas.saturating_mul(U256::from(21_000u64)))
}

async fn fee_estimate(provider: &Provider<Http>) -> anyhow::Result<(U256, U256)> {
    let (max_fee, max_priority_fee) = provider.estimate_eip1559_fees(None).await?;
    Ok((max_fee, max_priority_fee))
}

#[async_trait]
impl JobVerifier for PaymentVerifier {
    async fn verify_job_payment(
        &self,
        job_id: H256,
        payment_tx_hash: H256,
    ) -> Result<PaymentVerification, VerifierError> {
        PaymentVerifier::verify_job_payment(self, job_id, payment_tx_hash).await
    }

    async fn check_job_status(&self, job_id: H256) -> Result<JobStatus, VerifierError> {
        PaymentVerifier::check_job_status(self, job_id).await
    }

    async fn get_job(&self, job_id: H256) -> Result<Job, VerifierError> {
        PaymentVerifier::get_job(self, job_id).await
    }

    async fn complete_job(&self, job_id: H256, blob_tx_hash: H256) -> Result<H256, VerifierError> {
        PaymentVerifier::complete_job(self, job_id, blob_tx_hash).await
    }
}
