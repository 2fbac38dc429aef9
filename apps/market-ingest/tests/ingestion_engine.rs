//! Ingestion Engine Integration Tests
//!
//! Runs the engine against real source adapters pointed at mock HTTP
//! servers, with in-memory and failing record stores.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use market_ingest::application::services::FetchError;
use market_ingest::infrastructure::config::{BINANCE, YAHOO};
use market_ingest::infrastructure::persistence::InMemoryRecordStore;
use market_ingest::infrastructure::sources::build_source;
use market_ingest::{
    AssetClass, ConnectionConfig, ConnectionState, EngineSettings, IngestError, IngestionEngine,
    MarketDataSource, MarketRecord, PersistenceError, PersistenceStatus, RawPayload, RecordStore,
    RetryConfig, SourceError, SourceRegistration, SourceSettings, TradingConfig,
};
use market_ingest::domain::market_data::CryptoCandle;

fn fast_connection() -> ConnectionConfig {
    ConnectionConfig {
        min_request_interval: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 2,
            ..RetryConfig::default()
        },
    }
}

fn settings(base: SourceSettings, server: &MockServer) -> SourceSettings {
    SourceSettings {
        base_url: server.uri(),
        connection: fast_connection(),
        ..base
    }
}

async fn binance_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[
            1_700_000_000_000_i64,
            "42000.00",
            "42100.00",
            "41950.00",
            "42050.00",
            "12.5",
            1_700_000_059_999_i64
        ]])))
        .mount(&server)
        .await;
    server
}

async fn unreachable_yahoo_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex("^/v8/finance/chart/.*$"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

async fn engine_with(
    registrations: Vec<SourceRegistration>,
    store: Option<Arc<dyn RecordStore>>,
) -> IngestionEngine {
    IngestionEngine::connect(
        Arc::new(TradingConfig::default()),
        EngineSettings {
            shutdown_grace: Duration::from_secs(1),
            ..EngineSettings::default()
        },
        registrations,
        store,
    )
    .await
}

struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn write(&self, _record: &MarketRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Unreachable("connection refused".to_string()))
    }
}

/// Emits one candle per call with strictly increasing open times.
struct SequenceSource {
    next_open_ms: AtomicI64,
}

#[async_trait]
impl MarketDataSource for SequenceSource {
    fn name(&self) -> &str {
        "sequence"
    }

    async fn fetch(&self, symbol: &str) -> Result<RawPayload, SourceError> {
        let open_time_ms = self.next_open_ms.fetch_add(60_000, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(RawPayload::Crypto(CryptoCandle {
            symbol: symbol.to_string(),
            open_time_ms,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1.0,
        }))
    }
}

#[tokio::test]
async fn unreachable_source_does_not_block_healthy_one() {
    let binance = binance_server().await;
    let yahoo = unreachable_yahoo_server().await;
    let store = Arc::new(InMemoryRecordStore::new());

    let registrations = vec![
        build_source(&settings(SourceSettings::binance(), &binance)).unwrap(),
        build_source(&settings(SourceSettings::yahoo(), &yahoo)).unwrap(),
    ];
    let engine = engine_with(registrations, Some(store.clone() as Arc<dyn RecordStore>)).await;

    assert_eq!(engine.active_sources(), vec![BINANCE.to_string()]);
    let states = engine.source_states();
    let yahoo_state = states.iter().find(|s| s.name == YAHOO).unwrap();
    assert_eq!(yahoo_state.state, ConnectionState::Failed);

    let ingested = engine.ingest("BTC/USDT", BINANCE).await.unwrap();
    assert_eq!(ingested.record.symbol, "BTC/USDT");
    assert_eq!(ingested.record.asset_class, AssetClass::Crypto);
    assert_eq!(ingested.record.source, BINANCE);
    assert!((ingested.record.close - 42050.0).abs() < f64::EPSILON);
    assert_eq!(ingested.persistence, PersistenceStatus::Stored);

    assert_eq!(engine.buffer_len("BTC/USDT"), 1);
    assert!(store.get("BTC-USDT_1700000000000_binance").is_some());

    let err = engine.ingest("AAPL", YAHOO).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::SourceUnavailable {
            reason: FetchError::Unavailable(ConnectionState::Failed),
            ..
        }
    ));
}

#[tokio::test]
async fn failing_store_keeps_record_buffered() {
    let binance = binance_server().await;
    let registrations = vec![build_source(&settings(SourceSettings::binance(), &binance)).unwrap()];
    let engine = engine_with(registrations, Some(Arc::new(FailingStore))).await;

    let ingested = engine.ingest("BTC/USDT", BINANCE).await.unwrap();
    assert!(ingested.persistence.is_failed());
    assert_eq!(engine.buffered("BTC/USDT"), vec![ingested.record]);
}

#[tokio::test]
async fn malformed_payload_is_not_buffered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([[
            1_700_000_000_000_i64,
            "42000.00",
            "41000.00",
            "41950.00",
            "42050.00",
            "12.5"
        ]])))
        .mount(&server)
        .await;

    let registrations = vec![build_source(&settings(SourceSettings::binance(), &server)).unwrap()];
    let engine = engine_with(registrations, None).await;

    let err = engine.ingest("BTC/USDT", BINANCE).await.unwrap_err();
    assert!(matches!(err, IngestError::DataValidation { .. }));
    assert_eq!(engine.buffer_len("BTC/USDT"), 0);
    assert_eq!(engine.active_sources(), vec![BINANCE.to_string()]);
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v3/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v3/klines"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let registrations = vec![build_source(&settings(SourceSettings::binance(), &server)).unwrap()];
    let engine = engine_with(registrations, None).await;

    let err = engine.ingest("BTC/USDT", BINANCE).await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::SourceUnavailable {
            reason: FetchError::RetriesExhausted { attempts: 2, .. },
            ..
        }
    ));
    assert!(engine.active_sources().is_empty());
}

#[tokio::test]
async fn concurrent_ingests_for_one_symbol_append_in_order() {
    let source = Arc::new(SequenceSource {
        next_open_ms: AtomicI64::new(1_700_000_000_000),
    });
    let engine = engine_with(
        vec![SourceRegistration::new(source, fast_connection())],
        None,
    )
    .await;

    let results = join_all((0..10).map(|_| engine.ingest("ETH/USDT", "sequence"))).await;
    assert!(results.iter().all(Result::is_ok));

    let buffered = engine.buffered("ETH/USDT");
    assert_eq!(buffered.len(), 10);
    assert!(buffered.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn shutdown_rejects_new_ingests() {
    let binance = binance_server().await;
    let registrations = vec![build_source(&settings(SourceSettings::binance(), &binance)).unwrap()];
    let engine = engine_with(registrations, None).await;

    engine.ingest("BTC/USDT", BINANCE).await.unwrap();
    engine.shutdown().await;

    assert_eq!(
        engine.ingest("BTC/USDT", BINANCE).await.unwrap_err(),
        IngestError::ShuttingDown
    );
    assert_eq!(engine.buffer_len("BTC/USDT"), 1);
}

#[tokio::test]
async fn unknown_source_is_reported() {
    let engine = engine_with(Vec::new(), None).await;
    assert_eq!(
        engine.ingest("BTC/USDT", "kraken").await.unwrap_err(),
        IngestError::UnknownSource("kraken".to_string())
    );
}
