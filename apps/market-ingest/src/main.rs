//! Market Ingest Binary
//!
//! Polls the configured market data sources and writes normalized records
//! through to Firestore.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Trading
//! - `PAPER_TRADING`, `MAX_POSITION_SIZE`, `STOP_LOSS_PCT`, `TAKE_PROFIT_PCT`,
//!   `PATTERN_RECOGNITION_WINDOW`, `RL_EPISODES`, `MODEL_RETRAIN_THRESHOLD`,
//!   `TRADE_SLIPPAGE`, `ADAPTATION_FREQUENCY_MINUTES`
//!
//! ## Sources
//! - `INGEST_SOURCES`: Comma list (default: binance,yahoo)
//! - `BINANCE_*` / `YAHOO_*`: `BASE_URL`, `SYMBOLS`, `RATE_LIMIT_MS`,
//!   `TIMEOUT_MS`, `RETRY_MAX_ATTEMPTS`, `RETRY_INITIAL_DELAY_MS`,
//!   `RETRY_MAX_DELAY_MS`
//!
//! ## Persistence
//! - `FIREBASE_PROJECT_ID`: Enables Firestore write-through when set
//! - `FIREBASE_API_KEY`, `FIREBASE_DATABASE`, `FIREBASE_COLLECTION`,
//!   `FIREBASE_BASE_URL`
//!
//! ## Runtime
//! - `INGEST_POLL_INTERVAL_SECS` (default: 60)
//! - `INGEST_BUFFER_CAPACITY` (default: 1000), `INGEST_BUFFER_MAX_AGE_SECS`
//!   (default: 86400)
//! - `INGEST_PERSIST_TIMEOUT_MS`, `INGEST_SHUTDOWN_GRACE_SECS`
//! - `INGEST_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`,
//!   `RUST_LOG`

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use market_ingest::infrastructure::health::{HealthServer, HealthServerState};
use market_ingest::infrastructure::persistence::FirestoreStore;
use market_ingest::infrastructure::sources::build_source;
use market_ingest::infrastructure::telemetry;
use market_ingest::{IngestionEngine, RecordStore, ServiceConfig, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market ingest");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = ServiceConfig::from_env().context("failed to load configuration")?;
    if !config.trading.validate() {
        anyhow::bail!("trading configuration failed validation");
    }
    log_config(&config);

    let registrations = config
        .sources
        .iter()
        .map(build_source)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to build source adapters")?;

    let store: Option<Arc<dyn RecordStore>> = match config.firestore.clone() {
        Some(settings) => Some(Arc::new(
            FirestoreStore::new(settings).context("failed to build Firestore client")?,
        )),
        None => {
            tracing::warn!("FIREBASE_PROJECT_ID not set, records will only be buffered");
            None
        }
    };
    let persistence_enabled = store.is_some();

    let engine = Arc::new(
        IngestionEngine::connect(
            Arc::new(config.trading.clone()),
            config.ingest.engine.clone(),
            registrations,
            store,
        )
        .await,
    );

    if engine.active_sources().is_empty() {
        tracing::error!("No source completed its handshake, polling will stop immediately");
    }

    let health_cancel = CancellationToken::new();
    if config.ingest.health_port > 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&engine),
            persistence_enabled,
        ));
        let health_server =
            HealthServer::new(config.ingest.health_port, health_state, health_cancel.clone());
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let symbols_by_source: BTreeMap<String, Vec<String>> = config
        .sources
        .iter()
        .map(|s| (s.name.clone(), s.symbols.clone()))
        .collect();
    let poll_interval = config.ingest.poll_interval;
    let poller = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&symbols_by_source, poll_interval).await })
    };

    tracing::info!("Market ingest ready");

    let shutdown = engine.shutdown_token();
    tokio::select! {
        result = await_signal() => result?,
        () = shutdown.cancelled() => {}
    }

    engine.shutdown().await;
    if let Err(e) = poller.await {
        tracing::error!(error = %e, "Poll loop task failed");
    }
    health_cancel.cancel();

    tracing::info!("Market ingest stopped");
    Ok(())
}

fn log_config(config: &ServiceConfig) {
    tracing::info!(
        paper_trading = config.trading.paper_trading,
        max_position_size = config.trading.max_position_size,
        sources = ?config.sources.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
        persistence = config.firestore.is_some(),
        poll_interval_secs = config.ingest.poll_interval.as_secs(),
        health_port = config.ingest.health_port,
        "Configuration loaded"
    );
    for source in &config.sources {
        tracing::debug!(
            source = %source.name,
            base_url = %source.base_url,
            symbols = ?source.symbols,
            rate_limit_ms = source.connection.min_request_interval.as_millis(),
            "Source configured"
        );
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    #[cfg(unix)]
    let terminate = async move {
        terminate.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
    Ok(())
}
