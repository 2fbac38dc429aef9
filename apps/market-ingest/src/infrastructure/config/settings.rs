//! Service Configuration Settings
//!
//! Source, persistence and runtime settings for the ingestion service,
//! loaded from environment variables.

use std::time::Duration;

use super::env::{
    EnvLookup, lookup_str, parse_duration_millis, parse_duration_secs, parse_list,
    parse_positive_duration_secs, parse_positive_usize, parse_u16, parse_u32,
};
use super::trading::TradingConfig;
use crate::application::services::{ConnectionConfig, EngineSettings, RetryConfig};
use crate::domain::buffer::RetentionPolicy;

/// Name of the crypto exchange source.
pub const BINANCE: &str = "binance";

/// Name of the equities/FX source.
pub const YAHOO: &str = "yahoo";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is set but does not parse.
    #[error("environment variable {key}={value:?} is not a valid {expected}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
        /// Expected type.
        expected: &'static str,
    },

    /// Source name not recognized.
    #[error("unknown source in INGEST_SOURCES: {0}")]
    UnknownSource(String),
}

// =============================================================================
// Firestore
// =============================================================================

/// Firestore persistence settings.
#[derive(Clone, PartialEq, Eq)]
pub struct FirestoreSettings {
    /// Firebase project id.
    pub project_id: String,
    /// Web API key (may be empty when an emulator or proxy handles auth).
    pub api_key: String,
    /// Database id.
    pub database: String,
    /// Collection that receives market records.
    pub collection: String,
    /// REST endpoint root.
    pub base_url: String,
    /// Upper bound on one HTTP request.
    pub request_timeout: Duration,
}

impl FirestoreSettings {
    /// Default REST endpoint.
    pub const DEFAULT_BASE_URL: &'static str = "https://firestore.googleapis.com/v1";

    /// Settings for `project_id` with defaults elsewhere.
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_key: String::new(),
            database: "(default)".to_string(),
            collection: "market_data".to_string(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    /// Load from `FIREBASE_*` variables. Returns `None` when
    /// `FIREBASE_PROJECT_ID` is unset, which disables persistence.
    #[must_use]
    pub fn from_lookup(lookup: &dyn EnvLookup) -> Option<Self> {
        let mut settings = Self::new(lookup_str(lookup, "FIREBASE_PROJECT_ID")?);
        if let Some(api_key) = lookup_str(lookup, "FIREBASE_API_KEY") {
            settings.api_key = api_key;
        }
        if let Some(database) = lookup_str(lookup, "FIREBASE_DATABASE") {
            settings.database = database;
        }
        if let Some(collection) = lookup_str(lookup, "FIREBASE_COLLECTION") {
            settings.collection = collection;
        }
        if let Some(base_url) = lookup_str(lookup, "FIREBASE_BASE_URL") {
            settings.base_url = base_url.trim_end_matches('/').to_string();
        }
        Some(settings)
    }
}

impl std::fmt::Debug for FirestoreSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirestoreSettings")
            .field("project_id", &self.project_id)
            .field("api_key", &"[REDACTED]")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Sources
// =============================================================================

/// Settings for one upstream source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// Source name.
    pub name: String,
    /// REST endpoint root.
    pub base_url: String,
    /// Symbols polled by the service loop.
    pub symbols: Vec<String>,
    /// Rate limit, timeout and retry budget.
    pub connection: ConnectionConfig,
}

impl SourceSettings {
    /// Defaults for the crypto exchange source.
    #[must_use]
    pub fn binance() -> Self {
        Self {
            name: BINANCE.to_string(),
            base_url: "https://api.binance.com".to_string(),
            symbols: vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            connection: ConnectionConfig {
                min_request_interval: Duration::from_millis(1200),
                ..ConnectionConfig::default()
            },
        }
    }

    /// Defaults for the equities/FX source.
    #[must_use]
    pub fn yahoo() -> Self {
        Self {
            name: YAHOO.to_string(),
            base_url: "https://query1.finance.yahoo.com".to_string(),
            symbols: vec!["SPY".to_string(), "EURUSD=X".to_string()],
            connection: ConnectionConfig::default(),
        }
    }

    /// Defaults for a known source name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownSource`] for any other name.
    pub fn defaults_for(name: &str) -> Result<Self, ConfigError> {
        match name {
            BINANCE => Ok(Self::binance()),
            YAHOO => Ok(Self::yahoo()),
            other => Err(ConfigError::UnknownSource(other.to_string())),
        }
    }

    /// Apply `<PREFIX>_*` overrides on top of the defaults for `name`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown sources or unparseable values.
    pub fn from_lookup(name: &str, lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let mut settings = Self::defaults_for(name)?;
        let prefix = name.to_uppercase();
        let key = |suffix: &str| format!("{prefix}_{suffix}");

        if let Some(base_url) = lookup_str(lookup, &key("BASE_URL")) {
            settings.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(symbols) = parse_list(lookup, &key("SYMBOLS")) {
            settings.symbols = symbols;
        }

        let connection = &mut settings.connection;
        if let Some(v) = parse_duration_millis(lookup, &key("RATE_LIMIT_MS"))? {
            connection.min_request_interval = v;
        }
        if let Some(v) = parse_duration_millis(lookup, &key("TIMEOUT_MS"))? {
            connection.request_timeout = v;
        }
        if let Some(v) = parse_u32(lookup, &key("RETRY_MAX_ATTEMPTS"))? {
            connection.retry.max_attempts = v;
        }
        if let Some(v) = parse_duration_millis(lookup, &key("RETRY_INITIAL_DELAY_MS"))? {
            connection.retry.initial_delay = v;
        }
        if let Some(v) = parse_duration_millis(lookup, &key("RETRY_MAX_DELAY_MS"))? {
            connection.retry.max_delay = v;
        }

        Ok(settings)
    }
}

// =============================================================================
// Ingest Runtime
// =============================================================================

/// Runtime settings for the ingestion service.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSettings {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Engine settings (retention, timeouts, shutdown grace).
    pub engine: EngineSettings,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            engine: EngineSettings::default(),
            health_port: 8083,
        }
    }
}

impl IngestSettings {
    /// Load `INGEST_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable values, and for a zero poll
    /// interval, buffer capacity or buffer max age.
    pub fn from_lookup(lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        let defaults = RetentionPolicy::default();

        if let Some(v) = parse_positive_duration_secs(lookup, "INGEST_POLL_INTERVAL_SECS")? {
            settings.poll_interval = v;
        }
        settings.engine.retention = RetentionPolicy {
            capacity: parse_positive_usize(lookup, "INGEST_BUFFER_CAPACITY")?
                .unwrap_or(defaults.capacity),
            max_age: parse_positive_duration_secs(lookup, "INGEST_BUFFER_MAX_AGE_SECS")?
                .unwrap_or(defaults.max_age),
        };
        if let Some(v) = parse_duration_millis(lookup, "INGEST_PERSIST_TIMEOUT_MS")? {
            settings.engine.persist_timeout = v;
        }
        if let Some(v) = parse_duration_secs(lookup, "INGEST_SHUTDOWN_GRACE_SECS")? {
            settings.engine.shutdown_grace = v;
        }
        if let Some(v) = parse_u16(lookup, "INGEST_HEALTH_PORT")? {
            settings.health_port = v;
        }

        Ok(settings)
    }
}

// =============================================================================
// Complete Configuration
// =============================================================================

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Trading parameters.
    pub trading: TradingConfig,
    /// Enabled sources, in `INGEST_SOURCES` order.
    pub sources: Vec<SourceSettings>,
    /// Firestore persistence, if enabled.
    pub firestore: Option<FirestoreSettings>,
    /// Runtime settings.
    pub ingest: IngestSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any recognized variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if any recognized variable fails to parse or names
    /// an unknown source.
    pub fn from_lookup(lookup: &dyn EnvLookup) -> Result<Self, ConfigError> {
        let names = parse_list(lookup, "INGEST_SOURCES")
            .unwrap_or_else(|| vec![BINANCE.to_string(), YAHOO.to_string()]);

        let sources = names
            .iter()
            .map(|name| SourceSettings::from_lookup(&name.to_lowercase(), lookup))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            trading: TradingConfig::from_lookup(lookup)?,
            sources,
            firestore: FirestoreSettings::from_lookup(lookup),
            ingest: IngestSettings::from_lookup(lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = ServiceConfig::from_lookup(&lookup(&[])).unwrap();
        assert_eq!(config.trading, TradingConfig::default());
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].name, BINANCE);
        assert_eq!(
            config.sources[0].connection.min_request_interval,
            Duration::from_millis(1200)
        );
        assert_eq!(config.sources[1].name, YAHOO);
        assert!(config.firestore.is_none());
        assert_eq!(config.ingest, IngestSettings::default());
    }

    #[test]
    fn source_overrides() {
        let config = ServiceConfig::from_lookup(&lookup(&[
            ("INGEST_SOURCES", "binance"),
            ("BINANCE_SYMBOLS", "SOL/USDT"),
            ("BINANCE_RATE_LIMIT_MS", "250"),
            ("BINANCE_RETRY_MAX_ATTEMPTS", "9"),
            ("BINANCE_BASE_URL", "http://localhost:9000/"),
        ]))
        .unwrap();

        assert_eq!(config.sources.len(), 1);
        let binance = &config.sources[0];
        assert_eq!(binance.symbols, vec!["SOL/USDT".to_string()]);
        assert_eq!(
            binance.connection.min_request_interval,
            Duration::from_millis(250)
        );
        assert_eq!(binance.connection.retry.max_attempts, 9);
        assert_eq!(binance.base_url, "http://localhost:9000");
    }

    #[test]
    fn unknown_source_is_an_error() {
        let err = ServiceConfig::from_lookup(&lookup(&[("INGEST_SOURCES", "binance,kraken")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownSource("kraken".to_string()));
    }

    #[test]
    fn bad_source_value_is_an_error() {
        let err = ServiceConfig::from_lookup(&lookup(&[("YAHOO_TIMEOUT_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "YAHOO_TIMEOUT_MS"));
    }

    #[test]
    fn firestore_enabled_by_project_id() {
        let config = ServiceConfig::from_lookup(&lookup(&[
            ("FIREBASE_PROJECT_ID", "trading-intel"),
            ("FIREBASE_API_KEY", "secret-key"),
        ]))
        .unwrap();
        let firestore = config.firestore.unwrap();
        assert_eq!(firestore.project_id, "trading-intel");
        assert_eq!(firestore.database, "(default)");
        assert!(!format!("{firestore:?}").contains("secret-key"));
    }

    #[test]
    fn ingest_overrides() {
        let settings = IngestSettings::from_lookup(&lookup(&[
            ("INGEST_POLL_INTERVAL_SECS", "5"),
            ("INGEST_BUFFER_CAPACITY", "50"),
            ("INGEST_HEALTH_PORT", "0"),
        ]))
        .unwrap();
        assert_eq!(settings.poll_interval, Duration::from_secs(5));
        assert_eq!(settings.engine.retention.capacity, 50);
        assert_eq!(
            settings.engine.retention.max_age,
            RetentionPolicy::default().max_age
        );
        assert_eq!(settings.health_port, 0);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = IngestSettings::from_lookup(&lookup(&[("INGEST_POLL_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "INGEST_POLL_INTERVAL_SECS")
        );
    }

    #[test]
    fn zero_buffer_retention_is_rejected() {
        for key in ["INGEST_BUFFER_CAPACITY", "INGEST_BUFFER_MAX_AGE_SECS"] {
            let err = IngestSettings::from_lookup(&lookup(&[(key, "0")])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key: ref k, .. } if k == key));
        }
    }
}
