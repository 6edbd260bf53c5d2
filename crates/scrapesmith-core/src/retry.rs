//! Per-target retry bookkeeping with exponential backoff.
//!
//! A record is created on a target's first failure, updated on every later
//! failure and removed on success. Once `attempts >= max_attempts` the
//! record is terminal: it shows up in [`RetryTracker::failed_urls`] and is
//! never offered for retry again.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RetryConfig;

#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub url: String,
    pub attempts: u32,
    pub last_error: String,
    pub next_retry_at: Instant,
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub can_retry: bool,
    pub attempts_made: u32,
    pub wait_time: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub tracked: usize,
    /// Records still eligible for another attempt.
    pub pending: usize,
    /// Records that ran out of attempts.
    pub exhausted: usize,
}

pub struct RetryTracker {
    config: RetryConfig,
    records: Mutex<HashMap<String, RetryRecord>>,
}

impl RetryTracker {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RetryRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a failure for `url` and compute its backoff.
    pub fn track_failed_url(&self, url: &str, error: &str) -> RetryDecision {
        let now = Instant::now();
        let mut records = self.lock();

        let record = records
            .entry(url.to_string())
            .and_modify(|r| {
                r.attempts += 1;
                r.last_error = error.to_string();
            })
            .or_insert_with(|| RetryRecord {
                url: url.to_string(),
                attempts: 1,
                last_error: error.to_string(),
                next_retry_at: now,
            });

        let wait_time = self.config.delay_for_attempt(record.attempts);
        record.next_retry_at = now + wait_time;
        let can_retry = record.attempts < self.config.max_attempts;

        tracing::debug!(
            %url,
            attempts = record.attempts,
            wait_ms = %wait_time.as_millis(),
            can_retry,
            "Tracked failed target"
        );

        RetryDecision {
            can_retry,
            attempts_made: record.attempts,
            wait_time,
        }
    }

    pub fn track_successful_url(&self, url: &str) {
        self.lock().remove(url);
    }

    /// Non-terminal records whose backoff has elapsed.
    pub fn urls_due_for_retry(&self) -> Vec<RetryRecord> {
        let now = Instant::now();
        self.lock()
            .values()
            .filter(|r| r.attempts < self.config.max_attempts && r.next_retry_at <= now)
            .cloned()
            .collect()
    }

    /// Terminal records.
    pub fn failed_urls(&self) -> Vec<RetryRecord> {
        self.lock()
            .values()
            .filter(|r| r.attempts >= self.config.max_attempts)
            .cloned()
            .collect()
    }

    pub fn record(&self, url: &str) -> Option<RetryRecord> {
        self.lock().get(url).cloned()
    }

    pub fn stats(&self) -> RetryStats {
        let records = self.lock();
        let exhausted = records
            .values()
            .filter(|r| r.attempts >= self.config.max_attempts)
            .count();
        RetryStats {
            tracked: records.len(),
            pending: records.len() - exhausted,
            exhausted,
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
