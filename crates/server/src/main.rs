//! Warden node entry point.
//!
//! The front node owns punishments and publishes mute changes; backend nodes
//! keep a mute cache fed from the mute channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use warden_common::{AppError, Config, NodeRole};
use warden_core::{EventDispatcher, InMemoryUserResolver, PunishmentService};
use warden_db::repositories::{PunishmentLogRepository, PunishmentRepository};
use warden_sync::{
    BackendMuteCache, MuteChannel, MuteSyncCommunicator, MuteSyncListener, RedisMuteChannel,
};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,warden=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var_os("WARDEN_LOG_JSON").is_some() {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::load().context("failed to load configuration")?;
    info!(node = %config.node.name, role = ?config.node.role, "Starting warden node...");

    match config.node.role {
        NodeRole::Front => run_front(&config).await?,
        NodeRole::Backend => run_backend(&config).await?,
    }

    info!("Node shutdown complete");
    Ok(())
}

async fn run_front(config: &Config) -> anyhow::Result<()> {
    let database = config
        .database
        .as_ref()
        .ok_or_else(|| AppError::Config("the front node needs a [database] section".to_string()))?;

    let db = warden_db::init(database).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    warden_db::migrate(&db).await?;
    info!("Migrations completed");

    let db = Arc::new(db);
    let service = PunishmentService::new(
        Arc::new(PunishmentRepository::new(Arc::clone(&db))),
        Arc::new(PunishmentLogRepository::new(Arc::clone(&db))),
        Arc::new(InMemoryUserResolver::new()),
        EventDispatcher::new(),
    )
    .with_config(&config.punishment);

    info!("Connecting to Redis...");
    let channel = RedisMuteChannel::connect(&config.redis).await?;
    let _communicator = MuteSyncCommunicator::start(
        service.clone(),
        Arc::new(channel.clone()),
        config.punishment.pending_sync_limit,
    );
    info!(channel = %channel.channel(), "Publishing mute changes");

    let sweep_interval = Duration::from_secs(config.punishment.sweep_interval_secs.max(1));
    let sweeper = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep_expired().await {
                if e.is_server_error() {
                    error!(error = %e, code = e.error_code(), "Expiry sweep failed");
                } else {
                    warn!(error = %e, code = e.error_code(), "Expiry sweep failed");
                }
            }
        }
    });
    info!(interval_secs = sweep_interval.as_secs(), "Expiry sweeper started");

    shutdown_signal().await;

    sweeper.abort();
    channel.shutdown().await?;
    Ok(())
}

async fn run_backend(config: &Config) -> anyhow::Result<()> {
    info!("Connecting to Redis...");
    let channel = RedisMuteChannel::connect(&config.redis).await?;
    channel.start().await?;

    let cache = BackendMuteCache::new();
    let listener = MuteSyncListener::new(cache).spawn(channel.subscribe());
    info!(channel = %channel.channel(), "Listening for mute changes");

    shutdown_signal().await;

    listener.abort();
    channel.shutdown().await?;
    Ok(())
}
