//! Source Connection
//!
//! Stateful handle around one [`MarketDataSource`]: enforces the source's
//! rate limit and request timeout, retries transient failures with backoff,
//! and drives the connection state machine.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limit::RateLimiter;
use super::retry::{RetryBudget, RetryConfig, RetryDecision};
use crate::application::ports::{MarketDataSource, SourceError};
use crate::domain::connection::{ConnectionState, IllegalTransition};
use crate::domain::market_data::RawPayload;
use crate::infrastructure::metrics;

/// Per-connection limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Minimum spacing between requests.
    pub min_request_interval: Duration,
    /// Upper bound on a single request, handshake included.
    pub request_timeout: Duration,
    /// Backoff and retry budget for transient failures.
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            min_request_interval: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Why a fetch through a connection produced no payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection is not serving requests.
    #[error("source is {0}")]
    Unavailable(ConnectionState),

    /// Consecutive backoff rounds exhausted the retry budget; the source is
    /// now failed.
    #[error("retry budget exhausted after {attempts} rounds: {last}")]
    RetriesExhausted {
        /// Backoff rounds spent.
        attempts: u32,
        /// Final error.
        last: SourceError,
    },

    /// Non-transient failure for this request.
    #[error(transparent)]
    Source(SourceError),

    /// Shutdown began before the request was issued.
    #[error("cancelled before the request was issued")]
    Cancelled,
}

/// Point-in-time view of a connection for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    /// Source name.
    pub name: String,
    /// Current state.
    pub state: ConnectionState,
    /// Backoff rounds spent in the open failure episode.
    pub retry_attempts: u32,
    /// Requests issued.
    pub requests_total: u64,
    /// Requests that failed.
    pub failures_total: u64,
    /// Most recent failure.
    pub last_error: Option<String>,
}

/// Stateful connection to one upstream source.
pub struct SourceConnection {
    source: Arc<dyn MarketDataSource>,
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    limiter: RateLimiter,
    retry: Mutex<RetryBudget>,
    last_error: RwLock<Option<String>>,
    requests_total: AtomicU64,
    failures_total: AtomicU64,
}

impl std::fmt::Debug for SourceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConnection")
            .field("name", &self.source.name())
            .field("state", &*self.state.read())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SourceConnection {
    /// Wrap a source. The connection starts `Uninitialized`.
    #[must_use]
    pub fn new(source: Arc<dyn MarketDataSource>, config: ConnectionConfig) -> Self {
        Self {
            limiter: RateLimiter::new(config.min_request_interval),
            retry: Mutex::new(RetryBudget::new(config.retry.clone())),
            source,
            config,
            state: RwLock::new(ConnectionState::Uninitialized),
            last_error: RwLock::new(None),
            requests_total: AtomicU64::new(0),
            failures_total: AtomicU64::new(0),
        }
    }

    /// Source name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Run the source handshake: `Connected` on success, `Failed` otherwise.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure; the connection is then `Failed`.
    pub async fn initialize(&self) -> Result<(), SourceError> {
        let result = match tokio::time::timeout(self.config.request_timeout, self.source.connect())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        };

        match &result {
            Ok(()) => {
                let _ = self.transition(ConnectionState::Connected);
                tracing::info!(source = self.name(), "Source connected");
            }
            Err(e) => {
                self.note_failure(e);
                let _ = self.transition(ConnectionState::Failed);
                tracing::error!(source = self.name(), error = %e, "Source handshake failed, marking unavailable");
            }
        }
        result
    }

    /// Fetch the latest payload for `symbol`, waiting for the rate-limit
    /// window and retrying transient failures within the retry budget.
    ///
    /// Once `cancel` fires no further request is issued: waits for the
    /// rate-limit slot or a retry end with [`FetchError::Cancelled`].
    ///
    /// # Errors
    ///
    /// See [`FetchError`].
    pub async fn fetch(
        &self,
        symbol: &str,
        cancel: &CancellationToken,
    ) -> Result<RawPayload, FetchError> {
        loop {
            let state = self.state();
            if !state.is_active() {
                return Err(FetchError::Unavailable(state));
            }

            let waited = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                waited = self.limiter.acquire() => waited,
            };
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if !waited.is_zero() {
                tracing::trace!(source = self.name(), waited_ms = waited.as_millis(), "Rate limit wait");
            }

            let ticket = self.retry.lock().ticket();
            self.requests_total.fetch_add(1, Ordering::Relaxed);
            let result =
                match tokio::time::timeout(self.config.request_timeout, self.source.fetch(symbol))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(self.timeout_error()),
                };

            let error = match result {
                Ok(payload) => {
                    self.record_success();
                    return Ok(payload);
                }
                Err(e) => e,
            };

            self.note_failure(&error);
            if !error.is_transient() {
                tracing::warn!(source = self.name(), symbol, error = %error, "Source rejected request");
                return Err(FetchError::Source(error));
            }

            let decision = self.retry.lock().on_failure(ticket, Instant::now());
            let until = match decision {
                RetryDecision::Exhausted { attempts } => {
                    let _ = self.transition(ConnectionState::Failed);
                    tracing::error!(
                        source = self.name(),
                        attempts,
                        error = %error,
                        "Retry budget exhausted, removing source from rotation"
                    );
                    return Err(FetchError::RetriesExhausted {
                        attempts,
                        last: error,
                    });
                }
                RetryDecision::Wait {
                    until,
                    attempt,
                    advanced: true,
                } => {
                    if self.transition(ConnectionState::Degraded).is_err() {
                        return Err(FetchError::Unavailable(self.state()));
                    }
                    metrics::record_retry(self.name());
                    tracing::warn!(
                        source = self.name(),
                        symbol,
                        attempt,
                        delay_ms = until.saturating_duration_since(Instant::now()).as_millis(),
                        error = %error,
                        "Transient source failure, retrying"
                    );
                    until
                }
                RetryDecision::Wait { until, attempt, .. } => {
                    tracing::debug!(source = self.name(), symbol, attempt, error = %error, "Joining pending retry");
                    until
                }
            };

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FetchError::Cancelled),
                () = tokio::time::sleep_until(until) => {}
            }
        }
    }

    /// Release the underlying source.
    pub async fn close(&self) {
        self.source.close().await;
        tracing::debug!(source = self.name(), "Source closed");
    }

    /// Health view of this connection.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            name: self.name().to_string(),
            state: self.state(),
            retry_attempts: self.retry.lock().attempts(),
            requests_total: self.requests_total.load(Ordering::Relaxed),
            failures_total: self.failures_total.load(Ordering::Relaxed),
            last_error: self.last_error.read().clone(),
        }
    }

    fn record_success(&self) {
        self.retry.lock().on_success();
        if self.state() == ConnectionState::Degraded
            && self.transition(ConnectionState::Connected).is_ok()
        {
            tracing::info!(source = self.name(), "Source recovered");
        }
    }

    fn note_failure(&self, error: &SourceError) {
        self.failures_total.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(error.to_string());
    }

    fn timeout_error(&self) -> SourceError {
        SourceError::Timeout(u64::try_from(self.config.request_timeout.as_millis()).unwrap_or(u64::MAX))
    }

    fn transition(&self, next: ConnectionState) -> Result<(), IllegalTransition> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(IllegalTransition {
                from: *state,
                to: next,
            });
        }
        let previous = std::mem::replace(&mut *state, next);
        drop(state);

        if previous != next {
            metrics::record_connection_state(self.name(), next);
            tracing::debug!(source = self.name(), from = %previous, to = %next, "Connection state changed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use futures::future::join_all;

    use super::*;
    use crate::domain::market_data::CryptoCandle;

    /// Source that replays a scripted sequence of results.
    struct ScriptedSource {
        handshake: Result<(), SourceError>,
        script: Mutex<VecDeque<Result<RawPayload, SourceError>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<RawPayload, SourceError>>) -> Arc<Self> {
            Arc::new(Self {
                handshake: Ok(()),
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(&self) -> Result<(), SourceError> {
            self.handshake.clone()
        }

        async fn fetch(&self, _symbol: &str) -> Result<RawPayload, SourceError> {
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Transport("script exhausted".into())))
        }
    }

    fn payload() -> RawPayload {
        RawPayload::Crypto(CryptoCandle {
            symbol: "BTC/USDT".into(),
            open_time_ms: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        })
    }

    fn config(max_attempts: u32) -> ConnectionConfig {
        ConnectionConfig {
            min_request_interval: Duration::ZERO,
            request_timeout: Duration::from_secs(1),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(10),
                multiplier: 1.0,
                jitter_factor: 0.0,
                max_attempts,
            },
        }
    }

    fn transport() -> SourceError {
        SourceError::Transport("connection reset".into())
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_success_connects() {
        let conn = SourceConnection::new(ScriptedSource::new(vec![]), config(3));
        assert_eq!(conn.state(), ConnectionState::Uninitialized);
        conn.initialize().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_failure_marks_failed() {
        let source = Arc::new(ScriptedSource {
            handshake: Err(transport()),
            script: Mutex::new(VecDeque::new()),
        });
        let conn = SourceConnection::new(source, config(3));
        assert!(conn.initialize().await.is_err());
        assert_eq!(conn.state(), ConnectionState::Failed);

        let err = conn
            .fetch("BTC/USDT", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Unavailable(ConnectionState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_recovers_to_connected() {
        let source = ScriptedSource::new(vec![Err(transport()), Ok(payload())]);
        let conn = SourceConnection::new(source, config(3));
        conn.initialize().await.unwrap();

        let result = conn.fetch("BTC/USDT", &CancellationToken::new()).await;
        assert_eq!(result.unwrap(), payload());
        assert_eq!(conn.state(), ConnectionState::Connected);

        let snapshot = conn.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.failures_total, 1);
        assert_eq!(snapshot.retry_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_marks_failed() {
        let source = ScriptedSource::new(vec![Err(transport()), Err(transport()), Err(transport())]);
        let conn = SourceConnection::new(source, config(2));
        conn.initialize().await.unwrap();

        let err = conn
            .fetch("BTC/USDT", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_does_not_degrade() {
        let rejected = SourceError::Rejected {
            status: 400,
            message: "Invalid symbol.".into(),
        };
        let source = ScriptedSource::new(vec![Err(rejected.clone())]);
        let conn = SourceConnection::new(source, config(2));
        conn.initialize().await.unwrap();

        let err = conn
            .fetch("NOPE/USDT", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Source(rejected));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let source = ScriptedSource::new(vec![Err(transport())]);
        let mut cfg = config(5);
        cfg.retry.initial_delay = Duration::from_secs(3600);
        cfg.retry.max_delay = Duration::from_secs(3600);
        let conn = SourceConnection::new(source, cfg);
        conn.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };

        let err = conn.fetch("BTC/USDT", &cancel).await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err, FetchError::Cancelled);
        assert_eq!(conn.state(), ConnectionState::Degraded);
        assert_eq!(conn.snapshot().requests_total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_issues_no_request() {
        let source = ScriptedSource::new(vec![Ok(payload())]);
        let conn = SourceConnection::new(source.clone(), config(3));
        conn.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            conn.fetch("BTC/USDT", &cancel).await.unwrap_err(),
            FetchError::Cancelled
        );
        assert_eq!(source.script.lock().len(), 1);
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_rate_limit_queue() {
        let source = ScriptedSource::new((0..10).map(|_| Ok(payload())).collect());
        let mut cfg = config(3);
        cfg.min_request_interval = Duration::from_secs(1);
        let conn = SourceConnection::new(source.clone(), cfg);
        conn.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                cancel.cancel();
            })
        };

        let results = join_all((0..10).map(|_| conn.fetch("BTC/USDT", &cancel))).await;
        canceller.await.unwrap();

        let issued = results.iter().filter(|r| r.is_ok()).count();
        let cancelled = results
            .iter()
            .filter(|r| matches!(r, Err(FetchError::Cancelled)))
            .count();
        assert_eq!((issued, cancelled), (2, 8));
        assert_eq!(source.script.lock().len(), 8);
        assert_eq!(conn.snapshot().requests_total, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failures_share_one_backoff_round() {
        let mut script: Vec<Result<RawPayload, SourceError>> =
            (0..6).map(|_| Err(transport())).collect();
        script.extend((0..6).map(|_| Ok(payload())));
        let conn = SourceConnection::new(ScriptedSource::new(script), config(2));
        conn.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        let results = join_all((0..6).map(|_| conn.fetch("BTC/USDT", &cancel))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(conn.state(), ConnectionState::Connected);
        let snapshot = conn.snapshot();
        assert_eq!(snapshot.requests_total, 12);
        assert_eq!(snapshot.failures_total, 6);
        assert_eq!(snapshot.retry_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_across_symbols_still_exhausts() {
        let script = (0..40).map(|_| Err(transport())).collect();
        let conn = SourceConnection::new(ScriptedSource::new(script), config(2));
        conn.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        let results = join_all((0..4).map(|_| conn.fetch("BTC/USDT", &cancel))).await;

        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(results.iter().all(Result::is_err));
        assert!(results.iter().any(|r| matches!(
            r,
            Err(FetchError::RetriesExhausted { attempts: 2, .. })
        )));
    }
}
