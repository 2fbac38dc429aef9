//! Firestore REST record store.
//!
//! Each record is upserted with `PATCH` to a document whose id is derived
//! from (symbol, timestamp, source), so re-ingesting a bar overwrites it.

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::Client;
use serde_json::{Value, json};

use crate::application::ports::{PersistenceError, RecordStore};
use crate::domain::market_data::MarketRecord;
use crate::infrastructure::config::FirestoreSettings;

/// Firestore-backed `RecordStore`.
#[derive(Debug, Clone)]
pub struct FirestoreStore {
    client: Client,
    settings: FirestoreSettings,
}

impl FirestoreStore {
    /// Create a store from settings.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Unreachable`] if the HTTP client cannot be
    /// built.
    pub fn new(settings: FirestoreSettings) -> Result<Self, PersistenceError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| PersistenceError::Unreachable(e.to_string()))?;
        Ok(Self { client, settings })
    }

    /// Document URL for `document_id`.
    #[must_use]
    pub fn document_url(&self, document_id: &str) -> String {
        let s = &self.settings;
        format!(
            "{}/projects/{}/databases/{}/documents/{}/{document_id}",
            s.base_url, s.project_id, s.database, s.collection
        )
    }

    fn timeout_millis(&self) -> u64 {
        u64::try_from(self.settings.request_timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Firestore typed-value document body for a record.
#[must_use]
pub fn document_body(record: &MarketRecord) -> Value {
    json!({
        "fields": {
            "symbol": {"stringValue": record.symbol},
            "timestamp": {
                "timestampValue": record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
            },
            "open": {"doubleValue": record.open},
            "high": {"doubleValue": record.high},
            "low": {"doubleValue": record.low},
            "close": {"doubleValue": record.close},
            "volume": {"doubleValue": record.volume},
            "asset_class": {"stringValue": record.asset_class.as_str()},
            "source": {"stringValue": record.source},
        }
    })
}

#[async_trait]
impl RecordStore for FirestoreStore {
    async fn write(&self, record: &MarketRecord) -> Result<(), PersistenceError> {
        let url = self.document_url(&record.key().document_id());
        let mut request = self.client.patch(&url).json(&document_body(record));
        if !self.settings.api_key.is_empty() {
            request = request.query(&[("key", self.settings.api_key.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PersistenceError::Timeout(self.timeout_millis())
            } else {
                PersistenceError::Unreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(PersistenceError::Unreachable(format!(
                "status {}: {body}",
                status.as_u16()
            )));
        }
        Err(PersistenceError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }
}
