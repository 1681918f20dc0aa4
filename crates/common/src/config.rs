use anyhow::{bail, Result};
use clap::Parser;

/// Every configuration surface in spec.md §6, env-driven with the
/// documented defaults. Validated once at startup; an invalid value is a
/// fatal startup error (process exit code 1).
#[derive(Parser, Debug, Clone)]
#[clap(name = "blobkit-proxy")]
#[clap(about = "Submits EIP-4844 blob transactions on behalf of escrow-paid users")]
pub struct ProxyConfig {
    #[clap(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[clap(long, env = "RPC_URL")]
    pub rpc_url: String,

    #[clap(long, env = "CHAIN_ID", default_value_t = 1)]
    pub chain_id: u64,

    #[clap(long, env = "ESCROW_CONTRACT")]
    pub escrow_contract: String,

    #[clap(long, env = "SIGNER_BACKEND", default_value = "raw")]
    pub signer_backend: String,

    #[clap(long, env = "PRIVATE_KEY")]
    pub private_key: Option<String>,

    #[clap(long, env = "KMS_ENDPOINT")]
    pub kms_endpoint: Option<String>,

    #[clap(long, env = "PROXY_FEE_PERCENT", default_value_t = 0)]
    pub proxy_fee_percent: u8,

    #[clap(long, env = "MAX_BLOB_SIZE", default_value_t = 131_072)]
    pub max_blob_size: usize,

    #[clap(long, env = "RATE_LIMIT_REQUESTS", default_value_t = 10)]
    pub rate_limit_requests: u32,

    #[clap(long, env = "RATE_LIMIT_WINDOW", default_value_t = 60)]
    pub rate_limit_window: u64,

    #[clap(long, env = "JOB_TIMEOUT", default_value_t = 300)]
    pub job_timeout: u64,

    #[clap(long, env = "REQUEST_SIGNING_SECRET")]
    pub request_signing_secret: String,

    #[clap(long, env = "KZG_TRUSTED_SETUP_PATH")]
    pub kzg_trusted_setup_path: String,

    #[clap(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    #[clap(long, env = "QUEUE_DB_PATH", default_value = "./blobkit-queue.db")]
    pub queue_db_path: String,

    #[clap(long, env = "HTTP_PROXY_COUNT", default_value_t = 0)]
    pub http_proxy_count: u8,

    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[clap(long, env = "CORS_ORIGIN", default_value = "*")]
    pub cors_origin: String,
}

impl ProxyConfig {
    /// Parses from the environment/CLI and checks bounds that `clap` alone
    /// cannot express. Call once at startup; a returned error is fatal.
    pub fn load() -> Result<Self> {
        let cfg = Self::parse();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.proxy_fee_percent > 10 {
            bail!("PROXY_FEE_PERCENT must be 0..=10, got {}", self.proxy_fee_percent);
        }
        if self.max_blob_size == 0 || self.max_blob_size > 131_072 {
            bail!("MAX_BLOB_SIZE must be 1..=131072, got {}", self.max_blob_size);
        }
        if self.request_signing_secret.len() < 32 {
            bail!("REQUEST_SIGNING_SECRET must be at least 32 characters");
        }
        match self.signer_backend.as_str() {
            "raw" => {
                if self.private_key.is_none() {
                    bail!("PRIVATE_KEY is required when SIGNER_BACKEND=raw");
                }
            }
            "kms" => {
                if self.kms_endpoint.is_none() {
                    bail!("KMS_ENDPOINT is required when SIGNER_BACKEND=kms");
                }
            }
            other => bail!("unknown SIGNER_BACKEND: {other}"),
        }
        if self.escrow_contract.is_empty() {
            bail!("ESCROW_CONTRACT is required");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ProxyConfig {
        ProxyConfig {
            port: 3000,
            host: "0.0.0.0".into(),
            rpc_url: "http://localhost:8545".into(),
            chain_id: 1,
            escrow_contract: "0x1111111111111111111111111111111111111111".into(),
            signer_backend: "raw".into(),
            private_key: Some("0xabc".into()),
            kms_endpoint: None,
            proxy_fee_percent: 0,
            max_blob_size: 131_072,
            rate_limit_requests: 10,
            rate_limit_window: 60,
            job_timeout: 300,
            request_signing_secret: "x".repeat(32),
            kzg_trusted_setup_path: "/tmp/setup.txt".into(),
            redis_url: "redis://localhost:6379".into(),
            queue_db_path: "./q.db".into(),
            http_proxy_count: 0,
            log_level: "info".into(),
            cors_origin: "*".into(),
        }
    }

    #[test]
    fn rejects_short_signing_secret() {
        let mut cfg = base();
        cfg.request_signing_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_fee_percent_over_ten() {
        let mut cfg = base();
        cfg.proxy_fee_percent = 11;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_oversized_max_blob_size() {
        let mut cfg = base();
        cfg.max_blob_size = 200_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_raw_backend_without_private_key() {
        let mut cfg = base();
        cfg.private_key = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base().validate().is_ok());
    }
}
