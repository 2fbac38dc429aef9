#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Market Ingest - Multi-Source Market Data Ingestion
//!
//! Keeps rate-limited connections to a crypto exchange and an equities/FX
//! chart API, normalizes their payloads into OHLCV records, buffers them per
//! symbol and writes them through to Firestore.
//!
//! # Layers (inside to outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `market_data`: Records, raw payloads, normalization and validation
//!   - `buffer`: Bounded per-symbol retention
//!   - `connection`: Connection state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Source and record store interfaces
//!   - `services`: Ingestion engine, connections, rate limiting, retry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `config`: Trading and service configuration from the environment
//!   - `sources`: Binance and Yahoo Finance REST adapters
//!   - `persistence`: Firestore and in-memory record stores
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! Binance REST ─┐     ┌────────────┐     ┌──────────────┐     ┌───────────┐
//!               ├────►│ Connection │────►│ Normalize +  │────►│ Firestore │
//! Yahoo REST ───┘     │ rate/retry │     │ symbol buffer│     └───────────┘
//!                     └────────────┘     └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::buffer::RetentionPolicy;
pub use domain::connection::ConnectionState;
pub use domain::market_data::{AssetClass, MarketRecord, RawPayload};

// Ports and services
pub use application::ports::{MarketDataSource, PersistenceError, RecordStore, SourceError};
pub use application::services::{
    ConnectionConfig, EngineSettings, IngestError, Ingested, IngestionEngine, PersistenceStatus,
    RetryConfig, SourceRegistration,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, ConfigValidationError, FirestoreSettings, IngestSettings, ServiceConfig,
    SourceSettings, TradingConfig,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
