//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `MarketDataSource`: One upstream market data provider
//! - `RecordStore`: Durable storage for normalized records

use async_trait::async_trait;

use crate::domain::market_data::{MarketRecord, RawPayload};

// =============================================================================
// Market Data Source
// =============================================================================

/// Errors raised by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Network-level failure (DNS, connect, reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// Request did not complete within the source timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// Upstream throttled the request.
    #[error("rate limited by upstream (status {status})")]
    RateLimited {
        /// HTTP status returned.
        status: u16,
    },

    /// Upstream answered with a retryable server error.
    #[error("upstream error (status {status}): {message}")]
    Upstream {
        /// HTTP status returned.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Upstream refused the request (unknown symbol, bad parameters, auth).
    #[error("request rejected (status {status}): {message}")]
    Rejected {
        /// HTTP status returned.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Response could not be decoded into a payload.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Whether the failure says something about connection health and
    /// should consume the retry budget.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Upstream { .. }
        )
    }
}

/// An upstream market data provider.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Stable source identifier recorded on every record (e.g., "binance").
    fn name(&self) -> &str;

    /// Handshake performed once at engine construction.
    async fn connect(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Fetch the latest raw observation for `symbol`.
    async fn fetch(&self, symbol: &str) -> Result<RawPayload, SourceError>;

    /// Release resources held by the adapter.
    async fn close(&self) {}
}

// =============================================================================
// Record Store
// =============================================================================

/// Errors raised by durable storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// Store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// Store did not answer within the write timeout.
    #[error("write timed out after {0} ms")]
    Timeout(u64),

    /// Store refused the write.
    #[error("write rejected (status {status}): {message}")]
    Rejected {
        /// HTTP status returned.
        status: u16,
        /// Response body or reason.
        message: String,
    },
}

/// Durable storage for normalized records, keyed by (symbol, timestamp, source).
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write one record. Writing the same key twice overwrites.
    async fn write(&self, record: &MarketRecord) -> Result<(), PersistenceError>;
}
