//! Road telemetry - replays sensor streams, classifies road state, stores and fans out records
//!
//! Module structure:
//! - `domain/` - Sensor samples and wire/stored record shapes
//! - `io/` - External interfaces (CSV sources, SQLite, store API client, HTTP/WebSocket)
//! - `services/` - Pipeline logic (Aggregator, BatchBuffer, Classifier, SubscriptionRegistry)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use road_telemetry::infra::{Config, Metrics, StoreMode};
use road_telemetry::io::{start_api_server, ApiState, HttpStoreClient, SqliteStore};
use road_telemetry::services::{
    Aggregator, BatchBuffer, BatchPolicy, Pipeline, StoreGateway, SubscriptionRegistry,
    ZAxisClassifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Road telemetry agent and hub
#[derive(Parser, Debug)]
#[command(name = "road-telemetry", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "road-telemetry starting");

    let args = Args::parse();
    let config = Config::load(args.config.as_deref());

    let store_mode = match config.store_mode() {
        StoreMode::Local => "local",
        StoreMode::Http => "http",
    };
    info!(
        config_file = %config.config_file(),
        user_id = %config.user_id(),
        agent_enabled = %config.agent_enabled(),
        tick_ms = %config.tick_interval_ms(),
        batch_size = %config.batch_size(),
        flush_interval_ms = %config.flush_interval_ms(),
        store_mode = %store_mode,
        db_path = %config.db_path(),
        server_enabled = %config.server_enabled(),
        server_port = %config.server_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(SubscriptionRegistry::with_metrics(metrics.clone()));

    // The HTTP API always serves the local database
    let local_store = if config.server_enabled() || config.store_mode() == StoreMode::Local {
        Some(Arc::new(
            SqliteStore::open(config.db_path())
                .with_context(|| format!("Failed to open database {}", config.db_path()))?,
        ))
    } else {
        None
    };

    let mut server_handle = None;
    if let (true, Some(store)) = (config.server_enabled(), &local_store) {
        let addr = format!("{}:{}", config.bind_address(), config.server_port());
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP API on {addr}"))?;
        let state = ApiState {
            store: store.clone(),
            registry: registry.clone(),
            metrics: metrics.clone(),
            listener_queue: config.listener_queue(),
            agent: config.user_id().to_string(),
        };
        let server_shutdown = shutdown_rx.clone();
        server_handle = Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(listener, state, server_shutdown).await {
                error!(error = %e, "http_api_error");
            }
        }));
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        // First tick fires immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = signal_tx.send(true);
    });

    let result = if config.agent_enabled() {
        let store: Arc<dyn StoreGateway> = match (config.store_mode(), &local_store) {
            (StoreMode::Local, Some(store)) => store.clone() as Arc<dyn StoreGateway>,
            _ => Arc::new(HttpStoreClient::new(&config).context("Failed to build store client")?),
        };
        run_pipeline(&config, store, registry, metrics.clone(), shutdown_rx.clone()).await
    } else {
        let mut shutdown = shutdown_rx.clone();
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        Ok(())
    };

    // Stop the server too when the pipeline ended on its own
    let _ = shutdown_tx.send(true);
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }
    metrics.report().log();

    match &result {
        Ok(()) => info!("road-telemetry shutdown complete"),
        Err(e) => error!(error = %format!("{e:#}"), "road-telemetry stopped on fatal error"),
    }
    result
}

async fn run_pipeline(
    config: &Config,
    store: Arc<dyn StoreGateway>,
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let aggregator = Aggregator::open(config).context("Failed to open sources")?;
    let buffer = BatchBuffer::new(
        BatchPolicy::from_config(config),
        store,
        Arc::new(ZAxisClassifier::from_config(config)),
        registry,
        metrics.clone(),
    );
    let pipeline = Pipeline::new(
        aggregator,
        buffer,
        metrics,
        Duration::from_millis(config.tick_interval_ms()),
    );
    pipeline.run(shutdown).await.context("Pipeline aborted")
}
