//! Minimum-interval rate limiter.
//!
//! Callers that arrive inside the window wait for it rather than erroring.
//! Waiters are served in lock-acquisition order (tokio's mutex is fair).

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spaces requests to one upstream by at least `min_interval`.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_allowed: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter. A zero interval never waits.
    #[must_use]
    pub const fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_allowed: Mutex::const_new(None),
        }
    }

    /// Configured interval.
    #[must_use]
    pub const fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be issued and claim the slot.
    ///
    /// Returns how long the caller waited. Dropping the future before it
    /// completes claims no slot.
    pub async fn acquire(&self) -> Duration {
        let mut next_allowed = self.next_allowed.lock().await;
        let now = Instant::now();
        let waited = match *next_allowed {
            Some(at) if at > now => {
                tokio::time::sleep_until(at).await;
                at - now
            }
            _ => Duration::ZERO,
        };
        *next_allowed = Some(Instant::now() + self.min_interval);
        waited
    }
}
