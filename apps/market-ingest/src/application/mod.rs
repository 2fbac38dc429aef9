//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the ingestion services and the port interfaces
//! that define how the engine talks to sources and storage.

/// Port interfaces for external systems (sources, storage).
pub mod ports;

/// Ingestion engine and per-source connection management.
pub mod services;
