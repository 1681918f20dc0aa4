use ethers::types::H256;

/// Correlates log lines across a single request's lifetime. Attached to the
/// tracing span at pipeline entry so downstream components never need to
/// thread these fields through function signatures by hand.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub trace_id: String,
    pub job_id: Option<H256>,
    pub request_id: String,
}

impl LogContext {
    pub fn new(trace_id: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            job_id: None,
            request_id: request_id.into(),
        }
    }

    pub fn with_job_id(mut self, job_id: H256) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// Initializes the global tracing subscriber from `RUST_LOG`/`LOG_LEVEL`.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
