//! greenlightd — the workflow API server and escalation daemon.
//!
//! Wires the pieces together at startup: storage backend (Postgres when
//! a database URL is configured, in-memory otherwise), the executor,
//! the escalation sweeper as a background task, and the axum server
//! with graceful shutdown.

mod api;
mod config;
mod error;
mod tenant;

use crate::api::rest::router::create_router;
use crate::api::rest::state::{AppState, SharedStorage};
use crate::config::Settings;
use anyhow::Context;
use clap::Parser;
use greenlight_engine::{
    Clock, EffectSink, EscalationSweeper, Executor, SystemClock, TracingEffectSink,
};
use greenlight_store::{InMemoryWorkflowStorage, PgWorkflowStorage};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "greenlightd", about = "Greenlight workflow engine daemon")]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON)
    #[arg(long, env = "GREENLIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings =
        Settings::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }

    let store: SharedStorage = match &settings.database_url {
        Some(url) => {
            let storage = PgWorkflowStorage::connect(url)
                .await
                .context("failed to connect to postgres")?;
            tracing::info!("using postgres storage");
            Arc::new(storage)
        }
        None => {
            tracing::warn!("no database_url configured; using in-memory storage");
            Arc::new(InMemoryWorkflowStorage::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let effects: Arc<dyn EffectSink> = Arc::new(TracingEffectSink);
    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        effects,
        Arc::clone(&clock),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = EscalationSweeper::new(
        Arc::clone(&store),
        (*executor).clone(),
        clock,
        settings.escalation.batch_limit,
    );
    let sweep_interval = std::time::Duration::from_secs(settings.escalation.sweep_interval_secs);
    let sweeper_handle = tokio::spawn(sweeper.run(sweep_interval, shutdown_rx));

    let state = AppState { store, executor };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!(addr = %settings.bind_addr, "greenlightd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
