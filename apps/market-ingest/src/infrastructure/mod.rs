//! Infrastructure Layer
//!
//! Adapters for upstream sources, storage, configuration, and observability.

/// Environment-driven configuration.
pub mod config;

/// Health check and metrics endpoint.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// Record store adapters.
pub mod persistence;

/// REST source adapters.
pub mod sources;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
