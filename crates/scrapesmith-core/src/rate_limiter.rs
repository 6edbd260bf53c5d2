//! Sliding-window request throttling.
//!
//! Bounds outbound requests to `max_requests` per `window`. The limiter keeps
//! an ordered list of request timestamps; anything older than the window is
//! purged before each admission decision.
//!
//! State is in-memory and per instance. Build one limiter per engine run;
//! sharing across processes needs an external store and is not supported.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use scrapesmith_core::config::RateLimitConfig;
//! use scrapesmith_core::rate_limiter::RateLimiter;
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(RateLimitConfig::new(5, Duration::from_secs(1)));
//! let body = limiter.execute(|| async { "fetched" }).await;
//! # let _ = body;
//! # }
//! ```

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

pub struct RateLimiter {
    config: RateLimitConfig,
    /// Request times inside the current window, oldest first.
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn is_disabled(&self) -> bool {
        self.config.max_requests == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn purge(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.config.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until the oldest request leaves the window, or zero if under budget.
    fn delay_locked(&self, timestamps: &mut VecDeque<Instant>, now: Instant) -> Duration {
        if self.is_disabled() {
            return Duration::ZERO;
        }
        self.purge(timestamps, now);
        if timestamps.len() < self.config.max_requests as usize {
            return Duration::ZERO;
        }
        match timestamps.front() {
            Some(&oldest) => self
                .config
                .window
                .saturating_sub(now.duration_since(oldest)),
            None => Duration::ZERO,
        }
    }

    pub fn can_make_request(&self) -> bool {
        self.delay().is_zero()
    }

    pub fn delay(&self) -> Duration {
        let mut timestamps = self.lock();
        self.delay_locked(&mut timestamps, Instant::now())
    }

    /// Suspend until the window has room. Does not reserve the slot.
    pub async fn wait_for_slot(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tracing::debug!(delay_ms = %delay.as_millis(), "Rate limit reached, waiting");
            tokio::time::sleep(delay).await;
        }
    }

    pub fn track_request(&self) {
        if self.is_disabled() {
            return;
        }
        self.lock().push_back(Instant::now());
    }

    /// Wait for a slot and reserve it in one step.
    ///
    /// Concurrent callers cannot both claim the last slot: the check and the
    /// reservation happen under the same lock, and the sleep happens outside it.
    pub async fn acquire(&self) {
        if self.is_disabled() {
            return;
        }
        loop {
            let delay = {
                let mut timestamps = self.lock();
                let now = Instant::now();
                let delay = self.delay_locked(&mut timestamps, now);
                if delay.is_zero() {
                    timestamps.push_back(now);
                    return;
                }
                delay
            };
            tracing::debug!(delay_ms = %delay.as_millis(), "Rate limit reached, waiting");
            tokio::time::sleep(delay).await;
        }
    }

    /// Acquire a slot, then run `operation`.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire().await;
        operation().await
    }

    /// Number of requests currently inside the window.
    pub fn in_window(&self) -> usize {
        let mut timestamps = self.lock();
        self.purge(&mut timestamps, Instant::now());
        timestamps.len()
    }
}
