//! Application Services
//!
//! - `engine`: Multi-source ingestion, buffering and write-through
//! - `connection`: Per-source state machine, rate limiting and retries
//! - `rate_limit`: Minimum-interval request spacing
//! - `retry`: Per-episode retry budget with jittered backoff

pub mod connection;
pub mod engine;
pub mod rate_limit;
pub mod retry;

pub use connection::{ConnectionConfig, ConnectionSnapshot, FetchError, SourceConnection};
pub use engine::{
    BufferStats, EngineSettings, IngestError, IngestReport, Ingested, IngestionEngine,
    PersistenceStatus, SourceRegistration,
};
pub use rate_limit::RateLimiter;
pub use retry::{RetryBudget, RetryConfig, RetryDecision};
