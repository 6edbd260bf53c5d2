use std::time::Duration;

use crate::error::AppError;

/// Sliding-window rate limit settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per window. `0` disables limiting.
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_millis(1000),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn disabled() -> Self {
        Self {
            max_requests: 0,
            ..Self::default()
        }
    }
}

/// Per-target retry settings with exponential backoff.
///
/// Delay schedule: `base`, `2 * base`, `4 * base`, ...
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before the next attempt after `attempt` failures (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Configuration for an execution engine run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum targets in flight at once.
    pub concurrency: usize,
    /// Number of targets used for sample generation.
    pub sample_size: usize,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            sample_size: 3,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Read configuration from environment variables, falling back to defaults.
    ///
    /// - `SCRAPESMITH_RATE_LIMIT` (requests per window, `0` disables)
    /// - `SCRAPESMITH_RATE_WINDOW_MS`
    /// - `SCRAPESMITH_RETRY_BASE_MS`
    /// - `SCRAPESMITH_MAX_ATTEMPTS`
    /// - `SCRAPESMITH_CONCURRENCY`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let max_requests = parse_var(&lookup, "SCRAPESMITH_RATE_LIMIT")?
            .unwrap_or(defaults.rate_limit.max_requests as u64);
        let window_ms = parse_var(&lookup, "SCRAPESMITH_RATE_WINDOW_MS")?
            .unwrap_or(defaults.rate_limit.window.as_millis() as u64);
        let base_ms = parse_var(&lookup, "SCRAPESMITH_RETRY_BASE_MS")?
            .unwrap_or(defaults.retry.base_delay.as_millis() as u64);
        let max_attempts = parse_var(&lookup, "SCRAPESMITH_MAX_ATTEMPTS")?
            .unwrap_or(defaults.retry.max_attempts as u64);
        let concurrency =
            parse_var(&lookup, "SCRAPESMITH_CONCURRENCY")?.unwrap_or(defaults.concurrency as u64);

        if window_ms == 0 {
            return Err(AppError::ConfigError(
                "SCRAPESMITH_RATE_WINDOW_MS must be at least 1".into(),
            ));
        }
        if max_attempts == 0 {
            return Err(AppError::ConfigError(
                "SCRAPESMITH_MAX_ATTEMPTS must be at least 1".into(),
            ));
        }

        Ok(Self {
            concurrency: (concurrency as usize).max(1),
            sample_size: defaults.sample_size,
            rate_limit: RateLimitConfig::new(
                u32::try_from(max_requests).unwrap_or(u32::MAX),
                Duration::from_millis(window_ms),
            ),
            retry: RetryConfig::new(
                u32::try_from(max_attempts).unwrap_or(u32::MAX),
                Duration::from_millis(base_ms),
            ),
        })
    }
}

fn parse_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer"
            ))
        }),
    }
}
