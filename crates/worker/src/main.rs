use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use photochanger_core::clock::{Clock, SystemClock};
use photochanger_events::EventBus;
use photochanger_pipeline::media::PgMediaIndex;
use photochanger_pipeline::{
    FsMediaStore, PgJobQueue, PgSlotDirectory, PgStatsStore, PipelineContext, StatsCache,
};
use photochanger_providers::{ProviderRegistry, ProvidersConfig};
use photochanger_worker::config::{ConfigError, GatewayConfig, LogFormat};
use photochanger_worker::runtime::{ServiceSettings, Services};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long each task gets to finish after shutdown was requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("media root unusable: {0}")]
    MediaRoot(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = GatewayConfig::from_env();
    init_tracing(config.as_ref().map_or(LogFormat::Text, |c| c.log_format));

    let result = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Gateway worker failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "photochanger_worker=debug,photochanger_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    tracing::info!(
        sync_timeout_sec = config.sync_timeout_sec,
        max_in_flight = config.max_in_flight,
        workers = config.worker_count,
        "Loaded gateway configuration",
    );

    // --- Database ---
    let pool =
        photochanger_db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database connection pool created");

    photochanger_db::health_check(&pool).await?;
    tracing::info!("Database health check passed");

    photochanger_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // --- Media ---
    tokio::fs::create_dir_all(&config.media_root).await?;
    let media = FsMediaStore::new(
        &config.media_root,
        Arc::new(PgMediaIndex::new(pool.clone())),
        Arc::clone(&clock),
    );
    tracing::info!(root = %config.media_root.display(), "Media store ready");

    // --- Providers ---
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;
    let providers = ProviderRegistry::from_config(client, &ProvidersConfig::from_env());
    tracing::info!(providers = ?providers.ids(), "Provider adapters registered");

    // --- Pipeline ---
    let queue = PgJobQueue::new(pool.clone(), config.max_in_flight)
        .with_deadlines(config.ingest().deadlines());
    let ctx = PipelineContext {
        queue: Arc::new(queue),
        slots: Arc::new(PgSlotDirectory::new(pool.clone())),
        providers: Arc::new(providers),
        media: Arc::new(media),
        stats: Arc::new(StatsCache::new(
            Arc::new(PgStatsStore::new(pool.clone())),
            Arc::clone(&clock),
            config.stats(),
        )),
        events: Arc::new(EventBus::default()),
        clock,
    };

    let services = Services::start(
        ctx,
        &ServiceSettings {
            worker_count: config.worker_count,
            worker: config.worker(),
            expiry_sweep_interval: config.expiry_sweep_interval,
            cleanup_interval: config.cleanup_interval,
        },
    );

    shutdown_signal().await;

    let unclean = services.shutdown(SHUTDOWN_GRACE).await;
    if unclean > 0 {
        tracing::warn!(unclean, "Some tasks did not stop cleanly");
    }
    pool.close().await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
