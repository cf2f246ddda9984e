use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chatchan_api::state::AppStateInner;
use chatchan_core::{ChatServices, RetryPolicy, Settings};
use chatchan_db::{HashPartitioner, PartitionRouter, RandomPartitioner, StorageConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatchan=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret = std::env::var("CHATCHAN_JWT_SECRET").unwrap_or_else(|_| {
        warn!("CHATCHAN_JWT_SECRET not set, using the development secret");
        "dev-secret-change-me".into()
    });
    let internal_secret = std::env::var("CHATCHAN_INTERNAL_SECRET").unwrap_or_else(|_| {
        warn!("CHATCHAN_INTERNAL_SECRET not set, internal routes are closed");
        uuid::Uuid::new_v4().to_string()
    });
    let host = std::env::var("CHATCHAN_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = env_or("CHATCHAN_PORT", 3000)?;
    let dispatchers: usize = env_or("CHATCHAN_DISPATCHERS", 1)?;

    let settings = Settings {
        queue_staleness: Duration::from_secs(env_or("CHATCHAN_QUEUE_STALENESS_SECS", 300)?),
        poll_timeout: Duration::from_millis(env_or("CHATCHAN_POLL_TIMEOUT_MS", 5000)?),
        retry: RetryPolicy::jittered(
            env_or("CHATCHAN_MAX_ATTEMPTS", 5)?,
            Duration::from_millis(5),
            Duration::from_millis(100),
        ),
        ..Settings::default()
    };

    // Init storage
    let storage = load_storage_config()?;
    let strategy = std::env::var("CHATCHAN_PARTITION_STRATEGY").unwrap_or_else(|_| "random".into());
    let router = match strategy.as_str() {
        "random" => PartitionRouter::new(storage, RandomPartitioner)?,
        "hash" => PartitionRouter::new(storage, HashPartitioner)?,
        other => anyhow::bail!("unknown CHATCHAN_PARTITION_STRATEGY '{}'", other),
    };
    info!(
        "Partition router ready: {} partitions, {} assigned, {} placement",
        router.partition_count(),
        router.assigned_partitions().len(),
        strategy
    );
    // Open the core store now so a bad path fails at startup.
    router.core()?;

    let services = ChatServices::new(Arc::new(router), settings);

    // Background dispatchers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = Vec::with_capacity(dispatchers);
    for n in 0..dispatchers {
        let signature = format!("dispatcher-{}-{}-{}", std::process::id(), n, uuid::Uuid::new_v4());
        let dispatcher = services.dispatcher(signature);
        workers.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
    }

    // Routes
    let state = Arc::new(AppStateInner {
        services,
        jwt_secret,
        internal_secret,
    });
    let app = chatchan_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("ChatChan server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // HTTP is drained; let in-flight fan-outs finish.
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            warn!("Dispatcher task ended abnormally: {}", e);
        }
    }

    info!("ChatChan server stopped");
    Ok(())
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        Err(_) => Ok(default),
    }
}

/// The JSON file named by `CHATCHAN_STORAGE_CONFIG`, or a single store that
/// owns every partition.
fn load_storage_config() -> anyhow::Result<StorageConfig> {
    if let Ok(path) = std::env::var("CHATCHAN_STORAGE_CONFIG") {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading storage config {}", path))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing storage config {}", path))?;
        info!("Storage config loaded from {}", path);
        return Ok(config);
    }

    let db_path = std::env::var("CHATCHAN_DB_PATH").unwrap_or_else(|_| "chatchan.db".into());
    let partitions: u32 = env_or("CHATCHAN_PARTITIONS", 1)?;
    Ok(StorageConfig::all_in_one(PathBuf::from(db_path), partitions))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
