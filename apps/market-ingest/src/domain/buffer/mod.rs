//! Per-Symbol Record Buffer
//!
//! Bounded in-memory retention for normalized records. Each symbol keeps a
//! ring buffer limited both by record count and by age, where age is
//! measured against the newest buffered timestamp rather than the wall
//! clock so replayed or delayed data ages consistently.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::market_data::MarketRecord;

/// Retention limits for a [`SymbolBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum records kept per symbol. Oldest are evicted first.
    pub capacity: usize,
    /// Records older than this relative to the newest record are evicted.
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            capacity: 1_000,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Append-ordered buffer of records for one symbol.
#[derive(Debug)]
pub struct SymbolBuffer {
    policy: RetentionPolicy,
    records: VecDeque<MarketRecord>,
    evicted: u64,
}

impl SymbolBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            records: VecDeque::with_capacity(policy.capacity.min(1_024)),
            evicted: 0,
        }
    }

    /// Append a record, then apply retention.
    ///
    /// Returns the number of records evicted by this push.
    pub fn push(&mut self, record: MarketRecord) -> usize {
        let newest = self
            .records
            .back()
            .map_or(record.timestamp, |last| last.timestamp.max(record.timestamp));
        self.records.push_back(record);

        let mut evicted = self.evict_older_than(newest);
        while self.records.len() > self.policy.capacity {
            self.records.pop_front();
            evicted += 1;
        }
        self.evicted += evicted as u64;
        evicted
    }

    fn evict_older_than(&mut self, newest: DateTime<Utc>) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(self.policy.max_age) else {
            return 0;
        };
        let Some(cutoff) = newest.checked_sub_signed(max_age) else {
            return 0;
        };

        let mut evicted = 0;
        while self
            .records
            .front()
            .is_some_and(|front| front.timestamp < cutoff)
        {
            self.records.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Number of buffered records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recently appended record.
    #[must_use]
    pub fn latest(&self) -> Option<&MarketRecord> {
        self.records.back()
    }

    /// Copy of the buffered records in append order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MarketRecord> {
        self.records.iter().cloned().collect()
    }

    /// Total records evicted over the buffer's lifetime.
    #[must_use]
    pub const fn evicted_total(&self) -> u64 {
        self.evicted
    }
}
