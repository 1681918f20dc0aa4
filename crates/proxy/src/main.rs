use blobkit_breaker::{BreakerRegistry, BLOB_EXECUTOR, CACHE_STORE, ESCROW_CONTRACT};
use blobkit_cache::{Cache, JobCache};
use blobkit_common::{log::init_tracing, ProxyConfig};
use blobkit_executor::{BlobExecutor, BlobExecutorTrait};
use blobkit_queue::{CompletionQueue, CompletionQueueTrait};
use blobkit_signer::{KmsSigner, RawKeySigner, Signer};
use blobkit_verifier::{JobVerifier, PaymentVerifier};
use ethers::providers::{Http, Provider};
use ethers::types::{Address, U256};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use blobkit_proxy::middleware::rate_limit::build_limiter;
use blobkit_proxy::state::{AppState, Metrics};
use blobkit_proxy::router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match ProxyConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("fatal startup error: {err}");
            std::process::exit(1);
        }
    };

    init_tracing(&config.log_level);
    tracing::info!(chain_id = config.chain_id, "starting blobkit proxy");

    if let Err(err) = run(config).await {
        tracing::error!(error = %err, "fatal error, shutting down");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    // Initialization order: config -> signer -> verifier -> executor ->
    // cache -> queue -> HTTP router.
    let provider = Arc::new(Provider::<Http>::try_from(config.rpc_url.as_str())?);
    let escrow_address = Address::from_str(&config.escrow_contract)?;

    let signer: Arc<dyn Signer> = match config.signer_backend.as_str() {
        "raw" => {
            let private_key = config
                .private_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("PRIVATE_KEY required for raw signer backend"))?;
            Arc::new(RawKeySigner::new(private_key, config.chain_id).map_err(|e| anyhow::anyhow!(e))?)
        }
        "kms" => {
            let endpoint = config
                .kms_endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("KMS_ENDPOINT required for kms signer backend"))?;
            Arc::new(
                KmsSigner::connect(&endpoint)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?,
            )
        }
        other => anyhow::bail!("unknown SIGNER_BACKEND: {other}"),
    };
    tracing::info!(address = %format!("{:#x}", signer.address()), "signer ready");

    let breakers = Arc::new(BreakerRegistry::new());

    let verifier = Arc::new(PaymentVerifier::new(
        provider.clone(),
        escrow_address,
        breakers.get(ESCROW_CONTRACT),
        signer.clone(),
        config.chain_id,
    ));

    let executor = Arc::new(BlobExecutor::new(
        provider.clone(),
        Path::new(&config.kzg_trusted_setup_path),
        breakers.get(BLOB_EXECUTOR),
        signer.clone(),
        config.chain_id,
        U256::from(1_000_000_000_000u64),
    )?);

    let cache = Arc::new(JobCache::connect(&config.redis_url, breakers.get(CACHE_STORE)).await?);

    let queue = Arc::new(CompletionQueue::open(
        &config.queue_db_path,
        cache.clone() as Arc<dyn Cache>,
        verifier.clone() as Arc<dyn JobVerifier>,
        Duration::from_secs(60),
    )?);

    let metrics = Arc::new(Metrics::new()?);
    let limiter = build_limiter(config.rate_limit_requests, config.rate_limit_window);

    let state = Arc::new(AppState {
        config: config.clone(),
        signer,
        verifier: verifier as Arc<dyn JobVerifier>,
        executor: executor as Arc<dyn BlobExecutorTrait>,
        cache: cache as Arc<dyn Cache>,
        queue: queue.clone() as Arc<dyn CompletionQueueTrait>,
        breakers,
        provider,
        metrics,
        limiter,
        started_at: Instant::now(),
    });

    let cors = build_cors_layer(&config.cors_origin);
    let app = router::build_router(state.clone(), cors);

    let cancel = CancellationToken::new();
    let drain_handle = spawn_drain_loop(queue as Arc<dyn CompletionQueueTrait>, cancel.clone());

    let addr = config.socket_addr()?;
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel.cancel();
    let _ = drain_handle.await;
    Ok(())
}

fn build_cors_layer(cors_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(tower_http::cors::Any);
    if cors_origin == "*" {
        layer.allow_origin(tower_http::cors::Any)
    } else {
        match cors_origin.parse() {
            Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
            Err(_) => {
                tracing::warn!(cors_origin, "invalid CORS_ORIGIN, defaulting to permissive");
                layer.allow_origin(tower_http::cors::Any)
            }
        }
    }
}

/// The single background task draining the completion queue, on a
/// `tokio::time::interval` of `base` = 30s. Stops on SIGTERM, ensuring the
/// final drain cycle releases all D-locks it holds (the drain loop itself
/// always releases via its `LockGuard` regardless of how it exits).
fn spawn_drain_loop(queue: Arc<dyn CompletionQueueTrait>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("completion queue drain loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    let now = std::time::SystemTime::now()
                        .duration_since(std::time::UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    let outcomes = queue.drain(now).await;
                    for (job_id, outcome) in outcomes {
                        if let Err(err) = outcome {
                            tracing::warn!(job_id = ?job_id, error = %err, "completion retry attempt failed");
                        }
                    }
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
