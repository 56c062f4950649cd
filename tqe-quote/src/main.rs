//! tqe-quote - Translation quote lifecycle service
//!
//! Drives quotes from document submission through analysis, pricing and
//! escalation to payment. The analysis pipeline reports back over the
//! `/pipeline` endpoints.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tqe_common::config as common_config;
use tqe_common::events::EventBus;
use tqe_common::time::{Clock, SystemClock};
use tqe_quote::services::{
    AlwaysPass, EscalationController, EscalationSettings, HttpThresholdCheck, PipelineReadyHandler,
    PipelineWatcher, ProcessingMonitor, ThresholdCheck,
};
use tqe_quote::workflow::QuoteLifecycleEngine;
use tqe_quote::AppState;

/// Command-line arguments for tqe-quote
#[derive(Parser, Debug)]
#[command(name = "tqe-quote")]
#[command(about = "Translation quote lifecycle service")]
#[command(version)]
struct Args {
    /// Folder holding the database
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Address to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Default log filter when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Explicit config file
    #[arg(short, long, env = "TQE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = common_config::load_toml_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    common_config::apply_env_overrides(&mut config).context("Invalid environment override")?;
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(level) = args.log_level.clone() {
        config.logging.level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tqe-quote {}", env!("CARGO_PKG_VERSION"));

    // CLI → TQE_ROOT_FOLDER → TOML → OS default
    let root_folder =
        common_config::resolve_root_folder(args.root_folder.as_deref(), "TQE_ROOT_FOLDER", &config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    let db_path = common_config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = tqe_quote::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;
    let missing = missing_settings(&pool).await?;
    if !missing.is_empty() {
        warn!(
            keys = ?missing,
            "Workflow settings missing; pricing and quote creation will fail until they are set"
        );
    }

    let event_bus = EventBus::new(config.workflow.event_bus_capacity);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let threshold: Arc<dyn ThresholdCheck> = match &config.threshold.url {
        Some(url) => {
            info!(url = %url, "Threshold checks enabled");
            Arc::new(HttpThresholdCheck::new(url.clone()))
        }
        None => {
            info!("No threshold service configured, every quote passes");
            Arc::new(AlwaysPass)
        }
    };

    let escalation = Arc::new(EscalationController::new(
        pool.clone(),
        event_bus.clone(),
        clock.clone(),
        threshold,
        EscalationSettings {
            processing_timeout: config.workflow.processing_timeout(),
            threshold_timeout: config.threshold.timeout(),
            threshold_attempts: config.threshold.max_attempts,
        },
    ));
    let monitor = ProcessingMonitor::new(
        pool.clone(),
        event_bus.clone(),
        config.workflow.pipeline_poll_interval(),
    );
    let engine = Arc::new(QuoteLifecycleEngine::new(
        pool.clone(),
        event_bus.clone(),
        clock,
        escalation.clone(),
        monitor,
    ));

    engine
        .resume_countdowns()
        .await
        .context("Failed to resume processing countdowns")?;

    let shutdown = CancellationToken::new();

    let handler: Arc<dyn PipelineReadyHandler> = engine.clone();
    let watcher = PipelineWatcher::new(
        pool.clone(),
        event_bus.clone(),
        handler,
        config.workflow.pipeline_poll_interval(),
    );
    let watcher_task = tokio::spawn(watcher.run(shutdown.clone()));

    let sweep_task = tokio::spawn(expiry_sweep(
        engine.clone(),
        config.workflow.expiry_sweep_interval(),
        shutdown.clone(),
    ));

    let app = tqe_quote::build_router(AppState::new(engine, event_bus));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    escalation.shutdown();
    let _ = watcher_task.await;
    let _ = sweep_task.await;

    info!("Server shutdown complete");
    Ok(())
}

async fn missing_settings(pool: &sqlx::SqlitePool) -> Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for key in tqe_quote::config::SETTING_KEYS {
        let value = tqe_quote::db::catalog::get_setting::<String>(pool, key).await?;
        if value.is_none() {
            missing.push(key);
        }
    }
    Ok(missing)
}

/// Periodically expire quotes past their validity window
async fn expiry_sweep(
    engine: Arc<QuoteLifecycleEngine>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = engine.expire_stale().await {
                    warn!(error = %e, "Expiry sweep failed");
                }
            }
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
