//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Ingest**: Records ingested, ingest latency, validation failures
//! - **Sources**: Connection state, retries, unavailable sources
//! - **Buffers**: Evictions
//! - **Persistence**: Failed write-throughs
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! functions are no-ops until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;
use crate::domain::market_data::AssetClass;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Repeated calls return the first handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "market_ingest_records_total",
        "Records normalized and buffered"
    );
    describe_histogram!(
        "market_ingest_latency_seconds",
        "Time from ingest start to buffer append"
    );
    describe_counter!(
        "market_ingest_validation_failures_total",
        "Payloads dropped by normalization"
    );
    describe_counter!(
        "market_ingest_source_unavailable_total",
        "Ingests failed because the source was unavailable"
    );
    describe_counter!("market_ingest_retries_total", "Fetch retries scheduled");
    describe_gauge!(
        "market_ingest_connection_state",
        "Connection state (0=uninitialized 1=connected 2=degraded 3=failed)"
    );
    describe_counter!(
        "market_ingest_buffer_evictions_total",
        "Records evicted by the retention policy"
    );
    describe_counter!(
        "market_ingest_persistence_failures_total",
        "Write-throughs that failed or timed out"
    );
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Uninitialized => 0.0,
        ConnectionState::Connected => 1.0,
        ConnectionState::Degraded => 2.0,
        ConnectionState::Failed => 3.0,
    }
}

/// Record a buffered record.
pub fn record_ingested(source: &str, asset_class: AssetClass) {
    counter!(
        "market_ingest_records_total",
        "source" => source.to_string(),
        "asset_class" => asset_class.as_str()
    )
    .increment(1);
}

/// Record ingest latency up to the buffer append.
pub fn record_ingest_latency(source: &str, duration: Duration) {
    histogram!("market_ingest_latency_seconds", "source" => source.to_string())
        .record(duration.as_secs_f64());
}

/// Record a payload rejected by normalization.
pub fn record_validation_failure(source: &str) {
    counter!("market_ingest_validation_failures_total", "source" => source.to_string())
        .increment(1);
}

/// Record an ingest that failed because its source was unavailable.
pub fn record_source_unavailable(source: &str) {
    counter!("market_ingest_source_unavailable_total", "source" => source.to_string())
        .increment(1);
}

/// Record a scheduled retry.
pub fn record_retry(source: &str) {
    counter!("market_ingest_retries_total", "source" => source.to_string()).increment(1);
}

/// Publish a connection state change.
pub fn record_connection_state(source: &str, state: ConnectionState) {
    gauge!("market_ingest_connection_state", "source" => source.to_string())
        .set(state_value(state));
}

/// Record evictions from a symbol buffer.
pub fn record_buffer_evictions(count: usize) {
    counter!("market_ingest_buffer_evictions_total").increment(count as u64);
}

/// Record a failed write-through.
pub fn record_persistence_failure() {
    counter!("market_ingest_persistence_failures_total").increment(1);
}
