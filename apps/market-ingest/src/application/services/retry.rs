//! Retry Budget
//!
//! Transient failures are counted per failure episode, not per request. The
//! first failure after a success opens an episode, spends one attempt and
//! schedules a retry time. Any other request that fails before that time, or
//! that was issued before the episode last advanced, waits for the same retry
//! time without spending budget. The next success closes the episode.
//!
//! A connection serving many symbols therefore reaches `Failed` only after
//! `max_attempts` backoff rounds in a row fail, however many symbols share it.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Backoff and retry budget for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay after the first failure of an episode.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per backoff round.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Backoff rounds per episode before the source is failed (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

impl RetryConfig {
    /// Un-jittered delay for backoff round `round` (0-based).
    #[must_use]
    pub fn base_delay(&self, round: u32) -> Duration {
        let exponent = i32::try_from(round).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs < 0.0 {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = self.jitter_factor.min(1.0);
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        delay.mul_f64(factor)
    }
}

/// Episode position observed when a request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// What a request should do after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep until `until`, then try again.
    Wait {
        /// Scheduled retry time of the episode.
        until: Instant,
        /// Rounds spent in this episode.
        attempt: u32,
        /// Whether this failure opened or advanced the episode.
        advanced: bool,
    },
    /// The episode spent its budget.
    Exhausted {
        /// Rounds spent.
        attempts: u32,
    },
}

/// Shared retry state of one connection.
#[derive(Debug)]
pub struct RetryBudget {
    config: RetryConfig,
    generation: u64,
    attempts: u32,
    retry_at: Option<Instant>,
}

impl RetryBudget {
    /// Budget with no open episode.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self {
            config,
            generation: 0,
            attempts: 0,
            retry_at: None,
        }
    }

    /// Take a ticket before issuing a request.
    #[must_use]
    pub const fn ticket(&self) -> Ticket {
        Ticket(self.generation)
    }

    /// Record a transient failure of a request issued with `ticket`.
    pub fn on_failure(&mut self, ticket: Ticket, now: Instant) -> RetryDecision {
        let joins_pending = self
            .retry_at
            .filter(|&until| ticket.0 != self.generation || now < until);
        if let Some(until) = joins_pending {
            return RetryDecision::Wait {
                until,
                attempt: self.attempts,
                advanced: false,
            };
        }

        if self.config.max_attempts != 0 && self.attempts >= self.config.max_attempts {
            return RetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        let until = now + self.config.jittered(self.config.base_delay(self.attempts));
        self.attempts += 1;
        self.generation += 1;
        self.retry_at = Some(until);
        RetryDecision::Wait {
            until,
            attempt: self.attempts,
            advanced: true,
        }
    }

    /// Close the current episode, if any.
    pub const fn on_success(&mut self) {
        if self.retry_at.is_some() {
            self.generation += 1;
            self.attempts = 0;
            self.retry_at = None;
        }
    }

    /// Rounds spent in the open episode.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }
}
