//! Ingestion Engine
//!
//! Owns one [`SourceConnection`] per configured source, normalizes fetched
//! payloads into [`MarketRecord`]s, appends them to per-symbol buffers and
//! writes them through to an optional [`RecordStore`].
//!
//! # Concurrency
//!
//! Each symbol has an async ingest-order lock, held from fetch to append, so
//! ingests for one symbol land in the buffer in call order while different
//! symbols run in parallel. The buffer itself sits behind a separate
//! synchronous lock taken only to push or read, so the read side never waits
//! on a fetch. Connections never share locks with each other, and every fetch
//! and write is bounded by a timeout.
//!
//! # Shutdown
//!
//! [`IngestionEngine::shutdown`] cancels the engine token (new ingests fail
//! with [`IngestError::ShuttingDown`], retry waits abort), waits up to the
//! grace period for in-flight ingests, then closes every connection.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::connection::{ConnectionConfig, ConnectionSnapshot, FetchError, SourceConnection};
use crate::application::ports::{MarketDataSource, PersistenceError, RecordStore, SourceError};
use crate::domain::buffer::{RetentionPolicy, SymbolBuffer};
use crate::domain::market_data::{DataValidationError, MarketRecord, normalize};
use crate::infrastructure::config::TradingConfig;
use crate::infrastructure::metrics;

// =============================================================================
// Settings
// =============================================================================

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Per-symbol buffer retention.
    pub retention: RetentionPolicy,
    /// Upper bound on one write-through.
    pub persist_timeout: Duration,
    /// Time in-flight ingests get to finish on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            persist_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// A source together with its connection limits.
pub struct SourceRegistration {
    /// Adapter.
    pub source: Arc<dyn MarketDataSource>,
    /// Rate limit, timeout and retry budget.
    pub connection: ConnectionConfig,
}

impl SourceRegistration {
    /// Register a source.
    #[must_use]
    pub fn new(source: Arc<dyn MarketDataSource>, connection: ConnectionConfig) -> Self {
        Self { source, connection }
    }
}

// =============================================================================
// Results and Errors
// =============================================================================

/// Outcome of the durable leg of a write-through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceStatus {
    /// Record written to the store.
    Stored,
    /// No store configured.
    Skipped,
    /// Write failed; the record is still buffered.
    Failed(PersistenceError),
}

impl PersistenceStatus {
    /// Whether the durable write failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Successful ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    /// The buffered record.
    pub record: MarketRecord,
    /// Result of the write-through.
    pub persistence: PersistenceStatus,
    /// Records evicted from the symbol buffer by this append.
    pub evicted: usize,
}

/// Errors from [`IngestionEngine::ingest`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    /// No source registered under this name.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// The source could not serve the request.
    #[error("source {source_name} unavailable: {reason}")]
    SourceUnavailable {
        /// Source name.
        source_name: String,
        /// Why.
        reason: FetchError,
    },

    /// The payload was malformed; nothing was buffered.
    #[error("invalid data for {symbol} from {source_name}: {reason}")]
    DataValidation {
        /// Source name.
        source_name: String,
        /// Requested symbol.
        symbol: String,
        /// Violated rule.
        reason: DataValidationError,
    },

    /// The engine is shutting down.
    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Result of one (source, symbol) pair in a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// Source name.
    pub source: String,
    /// Symbol.
    pub symbol: String,
    /// Outcome.
    pub result: Result<Ingested, IngestError>,
}

/// Per-symbol buffer statistics.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BufferStats {
    /// Symbol.
    pub symbol: String,
    /// Records currently buffered.
    pub len: usize,
    /// Records evicted so far.
    pub evicted_total: u64,
}

/// Ingest ordering and retained records for one symbol.
struct SymbolSlot {
    ingest_order: tokio::sync::Mutex<()>,
    buffer: Mutex<SymbolBuffer>,
}

type SharedSlot = Arc<SymbolSlot>;

// =============================================================================
// Engine
// =============================================================================

/// Multi-source ingestion engine.
pub struct IngestionEngine {
    config: Arc<TradingConfig>,
    settings: EngineSettings,
    connections: BTreeMap<String, Arc<SourceConnection>>,
    store: Option<Arc<dyn RecordStore>>,
    buffers: RwLock<HashMap<String, SharedSlot>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl std::fmt::Debug for IngestionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionEngine")
            .field("settings", &self.settings)
            .field("sources", &self.connections.keys().collect::<Vec<_>>())
            .field("persistence", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl IngestionEngine {
    /// Build the engine and run every source handshake concurrently.
    ///
    /// A failing handshake marks that source `Failed` and is logged; the
    /// engine is still returned with the remaining sources active. A source
    /// registered twice keeps its first registration.
    pub async fn connect(
        config: Arc<TradingConfig>,
        settings: EngineSettings,
        sources: Vec<SourceRegistration>,
        store: Option<Arc<dyn RecordStore>>,
    ) -> Self {
        let mut connections = BTreeMap::new();
        for registration in sources {
            let name = registration.source.name().to_string();
            if connections.contains_key(&name) {
                tracing::warn!(source = %name, "Duplicate source registration ignored");
                continue;
            }
            connections.insert(
                name,
                Arc::new(SourceConnection::new(
                    registration.source,
                    registration.connection,
                )),
            );
        }

        join_all(connections.values().map(|conn| conn.initialize())).await;

        let active = connections
            .values()
            .filter(|conn| conn.state().is_active())
            .count();
        tracing::info!(
            sources = connections.len(),
            active,
            persistence = store.is_some(),
            paper_trading = config.paper_trading,
            "Ingestion engine initialized"
        );

        Self {
            config,
            settings,
            connections,
            store,
            buffers: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Trading configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    /// Token cancelled when shutdown starts.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Fetch, normalize, buffer and persist the latest observation of
    /// `symbol` from `source`.
    ///
    /// A failed write-through does not fail the ingest: the record stays
    /// buffered and [`Ingested::persistence`] reports the failure.
    ///
    /// # Errors
    ///
    /// See [`IngestError`].
    pub async fn ingest(&self, symbol: &str, source: &str) -> Result<Ingested, IngestError> {
        if self.cancel.is_cancelled() {
            return Err(IngestError::ShuttingDown);
        }
        let conn = self
            .connections
            .get(source)
            .ok_or_else(|| IngestError::UnknownSource(source.to_string()))?;

        self.tracker
            .track_future(self.ingest_with(conn, symbol))
            .await
    }

    async fn ingest_with(
        &self,
        conn: &SourceConnection,
        symbol: &str,
    ) -> Result<Ingested, IngestError> {
        let started = Instant::now();
        let slot = self.slot_for(symbol);
        let order = slot.ingest_order.lock().await;

        let raw = conn
            .fetch(symbol, &self.cancel)
            .await
            .map_err(|reason| self.fetch_error(conn.name(), symbol, reason))?;

        if raw.symbol() != symbol {
            return Err(self.validation_error(
                conn.name(),
                symbol,
                DataValidationError::Malformed(format!(
                    "payload is for {}, requested {symbol}",
                    raw.symbol()
                )),
            ));
        }

        let record = normalize(raw, conn.name())
            .map_err(|reason| self.validation_error(conn.name(), symbol, reason))?;

        let evicted = slot.buffer.lock().push(record.clone());
        drop(order);

        if evicted > 0 {
            metrics::record_buffer_evictions(evicted);
        }
        metrics::record_ingested(conn.name(), record.asset_class);
        metrics::record_ingest_latency(conn.name(), started.elapsed());
        tracing::debug!(
            source = conn.name(),
            symbol,
            timestamp = %record.timestamp,
            close = record.close,
            "Record ingested"
        );

        let persistence = self.persist(&record).await;
        Ok(Ingested {
            record,
            persistence,
            evicted,
        })
    }

    async fn persist(&self, record: &MarketRecord) -> PersistenceStatus {
        let Some(store) = &self.store else {
            return PersistenceStatus::Skipped;
        };

        let result = match tokio::time::timeout(self.settings.persist_timeout, store.write(record))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout(
                u64::try_from(self.settings.persist_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        match result {
            Ok(()) => PersistenceStatus::Stored,
            Err(e) => {
                metrics::record_persistence_failure();
                tracing::warn!(
                    symbol = %record.symbol,
                    source = %record.source,
                    error = %e,
                    "Write-through failed, record retained in buffer"
                );
                PersistenceStatus::Failed(e)
            }
        }
    }

    fn fetch_error(&self, source: &str, symbol: &str, reason: FetchError) -> IngestError {
        match reason {
            FetchError::Cancelled => IngestError::ShuttingDown,
            FetchError::Source(SourceError::Malformed(detail)) => {
                self.validation_error(source, symbol, DataValidationError::Malformed(detail))
            }
            reason => {
                metrics::record_source_unavailable(source);
                IngestError::SourceUnavailable {
                    source_name: source.to_string(),
                    reason,
                }
            }
        }
    }

    #[allow(clippy::unused_self)]
    fn validation_error(
        &self,
        source: &str,
        symbol: &str,
        reason: DataValidationError,
    ) -> IngestError {
        metrics::record_validation_failure(source);
        tracing::warn!(source, symbol, error = %reason, "Dropping invalid payload");
        IngestError::DataValidation {
            source_name: source.to_string(),
            symbol: symbol.to_string(),
            reason,
        }
    }

    fn slot_for(&self, symbol: &str) -> SharedSlot {
        if let Some(slot) = self.buffers.read().get(symbol) {
            return Arc::clone(slot);
        }
        let mut buffers = self.buffers.write();
        Arc::clone(buffers.entry(symbol.to_string()).or_insert_with(|| {
            Arc::new(SymbolSlot {
                ingest_order: tokio::sync::Mutex::new(()),
                buffer: Mutex::new(SymbolBuffer::new(self.settings.retention)),
            })
        }))
    }

    fn existing_slot(&self, symbol: &str) -> Option<SharedSlot> {
        self.buffers.read().get(symbol).cloned()
    }

    /// Ingest every (source, symbol) pair concurrently.
    ///
    /// Results are returned in input order; one failure never affects the
    /// others.
    pub async fn ingest_all(&self, requests: &[(String, String)]) -> Vec<IngestReport> {
        join_all(requests.iter().map(|(source, symbol)| async move {
            IngestReport {
                source: source.clone(),
                symbol: symbol.clone(),
                result: self.ingest(symbol, source).await,
            }
        }))
        .await
    }

    /// Poll every symbol of every active source each `poll_interval` until
    /// shutdown, or until no source remains active. A zero interval is
    /// refused and the loop returns immediately.
    pub async fn run(&self, symbols_by_source: &BTreeMap<String, Vec<String>>, poll_interval: Duration) {
        if poll_interval.is_zero() {
            tracing::error!("Poll interval must be non-zero, poll loop not started");
            return;
        }
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let active = self.active_sources();
            if active.is_empty() {
                tracing::error!("No active sources remain, stopping poll loop");
                break;
            }

            let requests: Vec<(String, String)> = symbols_by_source
                .iter()
                .filter(|(source, _)| active.contains(source))
                .flat_map(|(source, symbols)| {
                    symbols
                        .iter()
                        .map(move |symbol| (source.clone(), symbol.clone()))
                })
                .collect();

            let reports = self.ingest_all(&requests).await;
            let ok = reports.iter().filter(|r| r.result.is_ok()).count();
            tracing::info!(
                requested = reports.len(),
                ingested = ok,
                failed = reports.len() - ok,
                "Poll cycle complete"
            );
        }

        tracing::info!("Poll loop stopped");
    }

    /// Stop issuing fetches, let in-flight ingests finish within the grace
    /// period, then close every connection.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();

        let in_flight = self.tracker.len();
        tracing::info!(
            in_flight,
            grace_secs = self.settings.shutdown_grace.as_secs(),
            "Ingestion engine shutting down"
        );

        if tokio::time::timeout(self.settings.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.tracker.len(),
                "Shutdown grace period elapsed with ingests still in flight"
            );
        }

        join_all(self.connections.values().map(|conn| conn.close())).await;
        tracing::info!("Ingestion engine stopped");
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    /// Buffered records for `symbol` in append order.
    #[must_use]
    pub fn buffered(&self, symbol: &str) -> Vec<MarketRecord> {
        self.existing_slot(symbol)
            .map(|slot| slot.buffer.lock().snapshot())
            .unwrap_or_default()
    }

    /// Most recent record for `symbol`.
    #[must_use]
    pub fn latest(&self, symbol: &str) -> Option<MarketRecord> {
        let slot = self.existing_slot(symbol)?;
        let buffer = slot.buffer.lock();
        buffer.latest().cloned()
    }

    /// Number of records buffered for `symbol`.
    #[must_use]
    pub fn buffer_len(&self, symbol: &str) -> usize {
        self.existing_slot(symbol)
            .map_or(0, |slot| slot.buffer.lock().len())
    }

    /// Statistics for every buffered symbol, sorted by symbol.
    #[must_use]
    pub fn buffer_stats(&self) -> Vec<BufferStats> {
        let slots: Vec<(String, SharedSlot)> = self
            .buffers
            .read()
            .iter()
            .map(|(symbol, slot)| (symbol.clone(), Arc::clone(slot)))
            .collect();

        let mut stats: Vec<BufferStats> = slots
            .into_iter()
            .map(|(symbol, slot)| {
                let buffer = slot.buffer.lock();
                BufferStats {
                    symbol,
                    len: buffer.len(),
                    evicted_total: buffer.evicted_total(),
                }
            })
            .collect();
        stats.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        stats
    }

    /// Health snapshot of every connection, sorted by name.
    #[must_use]
    pub fn source_states(&self) -> Vec<ConnectionSnapshot> {
        self.connections.values().map(|conn| conn.snapshot()).collect()
    }

    /// Names of sources still in rotation.
    #[must_use]
    pub fn active_sources(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|(_, conn)| conn.state().is_active())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
