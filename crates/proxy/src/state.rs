use crate::middleware::rate_limit::IpRateLimiter;
use blobkit_breaker::BreakerRegistry;
use blobkit_cache::Cache;
use blobkit_common::ProxyConfig;
use blobkit_executor::BlobExecutorTrait;
use blobkit_queue::CompletionQueueTrait;
use blobkit_signer::Signer;
use blobkit_verifier::JobVerifier;
use ethers::providers::{Http, Provider};
use prometheus::{HistogramVec, IntCounterVec, Registry};
use std::sync::Arc;
use std::time::Instant;

pub struct Metrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let requests_total = IntCounterVec::new(
            prometheus::Opts::new("blobkit_proxy_requests_total", "Total HTTP requests handled"),
            &["method", "path", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "blobkit_proxy_request_duration_seconds",
                "Request handling latency",
            ),
            &["method", "path"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
        })
    }
}

/// Composition-root state shared by every handler and middleware layer,
/// wired once at startup in the order config -> signer -> verifier ->
/// executor -> cache -> queue -> router.
pub struct AppState {
    pub config: ProxyConfig,
    pub signer: Arc<dyn Signer>,
    pub verifier: Arc<dyn JobVerifier>,
    pub executor: Arc<dyn BlobExecutorTrait>,
    pub cache: Arc<dyn Cache>,
    pub queue: Arc<dyn CompletionQueueTrait>,
    pub breakers: Arc<BreakerRegistry>,
    pub provider: Arc<Provider<Http>>,
    pub metrics: Arc<Metrics>,
    pub limiter: Arc<IpRateLimiter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
