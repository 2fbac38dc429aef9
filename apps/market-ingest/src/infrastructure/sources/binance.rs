//! Binance spot klines adapter.
//!
//! Symbols use the slash form ("BTC/USDT") everywhere in the service; the
//! exchange expects the concatenated form ("BTCUSDT") on the wire.

use async_trait::async_trait;
use serde_json::Value;

use super::http::JsonClient;
use crate::application::ports::{MarketDataSource, SourceError};
use crate::domain::market_data::{CryptoCandle, RawPayload};
use crate::infrastructure::config::{BINANCE, SourceSettings};

const PING_PATH: &str = "/api/v3/ping";
const KLINES_PATH: &str = "/api/v3/klines";
const INTERVAL: &str = "1m";

/// Crypto candle source backed by the Binance REST API.
#[derive(Debug, Clone)]
pub struct BinanceSource {
    client: JsonClient,
}

impl BinanceSource {
    /// Create a source from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: JsonClient::new(&settings.base_url, settings.connection.request_timeout)?,
        })
    }
}

/// Exchange symbol for a service symbol: "BTC/USDT" becomes "BTCUSDT".
#[must_use]
pub fn exchange_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .flat_map(char::to_uppercase)
        .collect()
}

fn price(row: &[Value], index: usize, field: &'static str) -> Result<f64, SourceError> {
    let value = row
        .get(index)
        .ok_or_else(|| SourceError::Malformed(format!("kline missing {field}")))?;
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| SourceError::Malformed(format!("kline {field} is not numeric: {s:?}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| SourceError::Malformed(format!("kline {field} out of range"))),
        other => Err(SourceError::Malformed(format!(
            "kline {field} has unexpected type: {other}"
        ))),
    }
}

/// Decode the last row of a klines response into a candle for `symbol`.
fn parse_klines(symbol: &str, rows: &[Vec<Value>]) -> Result<CryptoCandle, SourceError> {
    let row = rows
        .last()
        .ok_or_else(|| SourceError::Malformed(format!("no klines returned for {symbol}")))?;

    let open_time_ms = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| SourceError::Malformed("kline open time missing".to_string()))?;

    Ok(CryptoCandle {
        symbol: symbol.to_string(),
        open_time_ms,
        open: price(row, 1, "open")?,
        high: price(row, 2, "high")?,
        low: price(row, 3, "low")?,
        close: price(row, 4, "close")?,
        volume: price(row, 5, "volume")?,
    })
}

#[async_trait]
impl MarketDataSource for BinanceSource {
    fn name(&self) -> &str {
        BINANCE
    }

    async fn connect(&self) -> Result<(), SourceError> {
        let _: Value = self.client.get_json(PING_PATH, &[]).await?;
        tracing::info!(base_url = %self.client.base_url(), "Binance reachable");
        Ok(())
    }

    async fn fetch(&self, symbol: &str) -> Result<RawPayload, SourceError> {
        let pair = exchange_symbol(symbol);
        let rows: Vec<Vec<Value>> = self
            .client
            .get_json(
                KLINES_PATH,
                &[("symbol", pair.as_str()), ("interval", INTERVAL), ("limit", "1")],
            )
            .await?;
        parse_klines(symbol, &rows).map(RawPayload::Crypto)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn settings(base_url: &str) -> SourceSettings {
        SourceSettings {
            base_url: base_url.to_string(),
            ..SourceSettings::binance()
        }
    }

    fn kline() -> Value {
        json!([[
            1_700_000_000_000_i64,
            "42000.00",
            "42100.00",
            "41950.00",
            "42050.00",
            "12.5",
            1_700_000_059_999_i64,
            "525000.0",
            100,
            "6.0",
            "252000.0",
            "0"
        ]])
    }

    #[test]
    fn exchange_symbol_strips_separators() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth-usdt"), "ETHUSDT");
        assert_eq!(exchange_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn parse_rejects_non_numeric_price() {
        let rows = vec![vec![json!(1), json!("abc"), json!("1"), json!("1"), json!("1"), json!("1")]];
        assert!(matches!(
            parse_klines("BTC/USDT", &rows),
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn fetch_decodes_latest_kline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KLINES_PATH))
            .and(query_param("symbol", "BTCUSDT"))
            .and(query_param("interval", "1m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kline()))
            .expect(1)
            .mount(&server)
            .await;

        let source = BinanceSource::new(&settings(&server.uri())).unwrap();
        let payload = source.fetch("BTC/USDT").await.unwrap();

        let RawPayload::Crypto(candle) = payload else {
            panic!("expected crypto payload");
        };
        assert_eq!(candle.symbol, "BTC/USDT");
        assert_eq!(candle.open_time_ms, 1_700_000_000_000);
        assert!((candle.close - 42050.0).abs() < f64::EPSILON);
        assert!((candle.volume - 12.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_response_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KLINES_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let source = BinanceSource::new(&settings(&server.uri())).unwrap();
        assert!(matches!(
            source.fetch("BTC/USDT").await,
            Err(SourceError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn invalid_symbol_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KLINES_PATH))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
            )
            .mount(&server)
            .await;

        let source = BinanceSource::new(&settings(&server.uri())).unwrap();
        let err = source.fetch("NOPE/USDT").await.unwrap_err();
        assert!(matches!(err, SourceError::Rejected { status: 400, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn connect_pings_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let source = BinanceSource::new(&settings(&server.uri())).unwrap();
        source.connect().await.unwrap();
    }

    #[tokio::test]
    async fn connect_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = BinanceSource::new(&settings(&server.uri())).unwrap();
        assert!(matches!(
            source.connect().await,
            Err(SourceError::Upstream { status: 503, .. })
        ));
    }
}
