//! Domain Layer - Core market data types and business rules.
//!
//! Pure Rust types with serialization support and no I/O.

/// Normalized market records and raw source payloads.
pub mod market_data;

/// Bounded per-symbol record retention.
pub mod buffer;

/// Source connection lifecycle.
pub mod connection;
