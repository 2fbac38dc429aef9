//! Yahoo Finance chart adapter for stocks and FX pairs.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::JsonClient;
use crate::application::ports::{MarketDataSource, SourceError};
use crate::domain::market_data::{EquityBar, RawPayload};
use crate::infrastructure::config::{SourceSettings, YAHOO};

const CHART_PATH: &str = "/v8/finance/chart";
const DEFAULT_PROBE_SYMBOL: &str = "SPY";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn at(series: &[Option<f64>], index: usize) -> Option<f64> {
    series.get(index).copied().flatten()
}

/// Pick the latest bar with a close price.
fn latest_bar(symbol: &str, response: ChartResponse) -> Result<EquityBar, SourceError> {
    if let Some(err) = response.chart.error {
        let description = err.description.unwrap_or_default();
        return Err(SourceError::Malformed(format!(
            "chart error {}: {description}",
            err.code
        )));
    }

    let result = response
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .ok_or_else(|| SourceError::Malformed(format!("no chart result for {symbol}")))?;

    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| SourceError::Malformed("chart has no quote series".to_string()))?;

    let index = (0..result.timestamp.len())
        .rev()
        .find(|&i| at(&quote.close, i).is_some())
        .ok_or_else(|| SourceError::Malformed(format!("no completed bar for {symbol}")))?;

    Ok(EquityBar {
        symbol: symbol.to_string(),
        timestamp_secs: result.timestamp[index],
        open: at(&quote.open, index),
        high: at(&quote.high, index),
        low: at(&quote.low, index),
        close: at(&quote.close, index),
        volume: at(&quote.volume, index),
    })
}

// =============================================================================
// Source
// =============================================================================

/// Stock and FX bar source backed by the Yahoo Finance chart API.
#[derive(Debug, Clone)]
pub struct YahooSource {
    client: JsonClient,
    probe_symbol: String,
}

impl YahooSource {
    /// Create a source from settings. The first configured symbol is used
    /// for the connection probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        Ok(Self {
            client: JsonClient::new(&settings.base_url, settings.connection.request_timeout)?,
            probe_symbol: settings
                .symbols
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_PROBE_SYMBOL.to_string()),
        })
    }

    async fn chart(&self, symbol: &str, range: &str, interval: &str) -> Result<ChartResponse, SourceError> {
        self.client
            .get_json(
                &format!("{CHART_PATH}/{symbol}"),
                &[("interval", interval), ("range", range)],
            )
            .await
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    fn name(&self) -> &str {
        YAHOO
    }

    async fn connect(&self) -> Result<(), SourceError> {
        self.chart(&self.probe_symbol, "1d", "1d").await?;
        tracing::info!(base_url = %self.client.base_url(), "Yahoo Finance reachable");
        Ok(())
    }

    async fn fetch(&self, symbol: &str) -> Result<RawPayload, SourceError> {
        let response = self.chart(symbol, "1d", "1m").await?;
        latest_bar(symbol, response).map(RawPayload::Equity)
    }
}
