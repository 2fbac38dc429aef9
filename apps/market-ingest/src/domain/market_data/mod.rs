//! Market Data Types
//!
//! The canonical internal representation of one OHLCV observation and the
//! source-specific raw payloads it is normalized from.
//!
//! Sources disagree on shape: a crypto exchange reports millisecond candle
//! open times with every field present, while the equities/FX chart API
//! reports second-resolution bars whose fields may be null. Normalization
//! maps both into [`MarketRecord`] and rejects anything that is not a
//! consistent bar.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Asset Class
// =============================================================================

/// Category of tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    /// Cryptocurrency pair.
    Crypto,
    /// Listed equity.
    Stock,
    /// Foreign exchange pair.
    Forex,
}

impl AssetClass {
    /// Get the asset class name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crypto => "crypto",
            Self::Stock => "stock",
            Self::Forex => "forex",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Market Record
// =============================================================================

/// One normalized price/volume observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    /// Symbol as requested (e.g., "BTC/USDT", "AAPL", "EURUSD=X").
    pub symbol: String,
    /// Bar timestamp (UTC).
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: f64,
    /// High price.
    pub high: f64,
    /// Low price.
    pub low: f64,
    /// Close price.
    pub close: f64,
    /// Traded volume.
    pub volume: f64,
    /// Asset class of the instrument.
    pub asset_class: AssetClass,
    /// Upstream source that produced the record.
    pub source: String,
}

impl MarketRecord {
    /// Identity of the record for persistence: (symbol, timestamp, source).
    #[must_use]
    pub fn key(&self) -> RecordKey<'_> {
        RecordKey {
            symbol: &self.symbol,
            timestamp: self.timestamp,
            source: &self.source,
        }
    }
}

/// Borrowed identity of a [`MarketRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordKey<'a> {
    /// Symbol.
    pub symbol: &'a str,
    /// Bar timestamp.
    pub timestamp: DateTime<Utc>,
    /// Source name.
    pub source: &'a str,
}

impl RecordKey<'_> {
    /// Path-safe document identifier, e.g. `BTC-USDT_1700000000000_binance`.
    #[must_use]
    pub fn document_id(&self) -> String {
        let symbol: String = self
            .symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '=' || c == '.' { c } else { '-' })
            .collect();
        format!(
            "{symbol}_{}_{}",
            self.timestamp.timestamp_millis(),
            self.source
        )
    }
}

// =============================================================================
// Raw Payloads
// =============================================================================

/// Candle as reported by a crypto exchange. Every field is present.
#[derive(Debug, Clone, PartialEq)]
pub struct CryptoCandle {
    /// Exchange-style symbol ("BTC/USDT").
    pub symbol: String,
    /// Candle open time in milliseconds since the Unix epoch.
    pub open_time_ms: i64,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Base asset volume.
    pub volume: f64,
}

/// Bar as reported by the equities/FX chart API. Fields may be null for
/// minutes with no trading.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityBar {
    /// Ticker ("AAPL", "EURUSD=X").
    pub symbol: String,
    /// Bar time in seconds since the Unix epoch.
    pub timestamp_secs: i64,
    /// Open.
    pub open: Option<f64>,
    /// High.
    pub high: Option<f64>,
    /// Low.
    pub low: Option<f64>,
    /// Close.
    pub close: Option<f64>,
    /// Volume (FX pairs report zero or null).
    pub volume: Option<f64>,
}

/// Source-specific payload before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawPayload {
    /// Crypto exchange candle.
    Crypto(CryptoCandle),
    /// Equities or FX bar.
    Equity(EquityBar),
}

impl RawPayload {
    /// Symbol the payload describes.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Crypto(c) => &c.symbol,
            Self::Equity(b) => &b.symbol,
        }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Reasons a raw payload cannot become a [`MarketRecord`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataValidationError {
    /// A required field was null or absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A value was NaN or infinite.
    #[error("non-finite value in field {0}")]
    NonFinite(&'static str),

    /// A price was zero or negative.
    #[error("non-positive price in field {field}: {value}")]
    NonPositivePrice {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// Volume was negative.
    #[error("negative volume: {0}")]
    NegativeVolume(f64),

    /// High/low do not bound open/close.
    #[error("inconsistent OHLC: open={open} high={high} low={low} close={close}")]
    InconsistentOhlc {
        /// Open.
        open: f64,
        /// High.
        high: f64,
        /// Low.
        low: f64,
        /// Close.
        close: f64,
    },

    /// Timestamp outside the representable range.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    /// Payload could not be decoded at all.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Infer the asset class of a chart-API ticker. FX pairs carry a `=X` suffix.
#[must_use]
pub fn equity_asset_class(symbol: &str) -> AssetClass {
    if symbol.ends_with("=X") {
        AssetClass::Forex
    } else {
        AssetClass::Stock
    }
}

/// Normalize a raw payload from `source` into a validated [`MarketRecord`].
///
/// # Errors
///
/// Returns [`DataValidationError`] if a field is missing, non-finite, or the
/// bar is internally inconsistent.
pub fn normalize(raw: RawPayload, source: &str) -> Result<MarketRecord, DataValidationError> {
    let record = match raw {
        RawPayload::Crypto(c) => MarketRecord {
            timestamp: Utc
                .timestamp_millis_opt(c.open_time_ms)
                .single()
                .ok_or(DataValidationError::InvalidTimestamp(c.open_time_ms))?,
            symbol: c.symbol,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            asset_class: AssetClass::Crypto,
            source: source.to_string(),
        },
        RawPayload::Equity(b) => MarketRecord {
            timestamp: Utc
                .timestamp_opt(b.timestamp_secs, 0)
                .single()
                .ok_or(DataValidationError::InvalidTimestamp(b.timestamp_secs))?,
            asset_class: equity_asset_class(&b.symbol),
            open: b.open.ok_or(DataValidationError::MissingField("open"))?,
            high: b.high.ok_or(DataValidationError::MissingField("high"))?,
            low: b.low.ok_or(DataValidationError::MissingField("low"))?,
            close: b.close.ok_or(DataValidationError::MissingField("close"))?,
            volume: b.volume.unwrap_or(0.0),
            symbol: b.symbol,
            source: source.to_string(),
        },
    };

    validate_record(&record)?;
    Ok(record)
}

/// Check the OHLCV invariants of a record.
///
/// # Errors
///
/// Returns the first violated invariant.
pub fn validate_record(record: &MarketRecord) -> Result<(), DataValidationError> {
    let prices = [
        ("open", record.open),
        ("high", record.high),
        ("low", record.low),
        ("close", record.close),
    ];
    for (field, value) in prices {
        if !value.is_finite() {
            return Err(DataValidationError::NonFinite(field));
        }
        if value <= 0.0 {
            return Err(DataValidationError::NonPositivePrice { field, value });
        }
    }

    if !record.volume.is_finite() {
        return Err(DataValidationError::NonFinite("volume"));
    }
    if record.volume < 0.0 {
        return Err(DataValidationError::NegativeVolume(record.volume));
    }

    let body_high = record.open.max(record.close);
    let body_low = record.open.min(record.close);
    if record.high < body_high || record.high < record.low || record.low > body_low {
        return Err(DataValidationError::InconsistentOhlc {
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
        });
    }

    Ok(())
}
