//! Shared HTTP plumbing for REST source adapters.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use crate::application::ports::SourceError;

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 256;

/// Error category for an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCategory {
    RateLimited,
    Retryable,
    Rejected,
}

fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::Rejected,
    }
}

/// Map a non-success status and body to a [`SourceError`].
pub(crate) fn status_error(status: StatusCode, body: &str) -> SourceError {
    let status_code = status.as_u16();
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    match categorize_status(status) {
        ErrorCategory::RateLimited => SourceError::RateLimited {
            status: status_code,
        },
        ErrorCategory::Retryable => SourceError::Upstream {
            status: status_code,
            message,
        },
        ErrorCategory::Rejected => SourceError::Rejected {
            status: status_code,
            message,
        },
    }
}

fn transport_error(err: &reqwest::Error, timeout: Duration) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
    } else {
        SourceError::Transport(err.to_string())
    }
}

/// JSON-over-HTTP client bound to one base URL.
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl JsonClient {
    /// Build a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("market-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` with `query` and decode the JSON body.
    ///
    /// # Errors
    ///
    /// Returns the categorized [`SourceError`] for transport failures,
    /// non-success statuses, and undecodable bodies.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&e, self.timeout))?;

        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Upstream returned error status");
            return Err(status_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| SourceError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(429, true ; "rate limited")]
    #[test_case(408, true ; "request timeout")]
    #[test_case(500, true ; "internal error")]
    #[test_case(503, true ; "unavailable")]
    #[test_case(400, false ; "bad request")]
    #[test_case(401, false ; "unauthorized")]
    #[test_case(404, false ; "not found")]
    fn status_transience(code: u16, transient: bool) {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(status_error(status, "").is_transient(), transient);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(10_000);
        let err = status_error(StatusCode::BAD_REQUEST, &body);
        match err {
            SourceError::Rejected { message, .. } => assert_eq!(message.len(), MAX_ERROR_BODY),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
