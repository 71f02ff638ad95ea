//! Retry eligibility and backoff for API calls.

use rand::Rng;
use std::time::Duration;

use super::error::RequestError;

/// Default number of additional attempts after the first one.
pub const DEFAULT_RETRIES: u32 = 3;

/// Base delay of the exponential backoff in milliseconds.
pub const BASE_DELAY_MS: u64 = 1000;

/// Default ceiling for a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Decides whether a failed attempt may be tried again.
///
/// Client errors (4xx) are permanent, authentication problems are handled by
/// the refresh protocol, and timeouts and transport failures are surfaced to
/// the caller right away. Server errors and interrupted bodies are retried.
pub fn should_retry(error: &RequestError) -> bool {
    match error {
        RequestError::Http { status, .. } => !status.is_client_error(),
        RequestError::Body { .. } => true,
        RequestError::Timeout { .. }
        | RequestError::Network { .. }
        | RequestError::AuthenticationRequired { .. }
        | RequestError::RetryAfterRefreshFailed { .. }
        | RequestError::InvalidRequest(_) => false,
    }
}

/// Exponential backoff: `base * 2^attempt`, optionally capped and jittered.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Option<Duration>,
    /// Extra random delay as a fraction of the computed delay (0.0 disables).
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Some(DEFAULT_MAX_DELAY),
            jitter_factor: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Plain doubling from `base`, no cap and no jitter.
    pub fn exponential(base: Duration) -> Self {
        Self {
            base,
            max_delay: None,
            jitter_factor: 0.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.max(0.0);
        self
    }

    /// Delay to wait after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let mut delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));

        if let Some(max) = self.max_delay {
            delay_ms = delay_ms.min(u64::try_from(max.as_millis()).unwrap_or(u64::MAX));
        }
        if self.jitter_factor > 0.0 {
            delay_ms = self.apply_jitter(delay_ms);
        }

        Duration::from_millis(delay_ms)
    }

    fn apply_jitter(&self, delay_ms: u64) -> u64 {
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let jitter_range = (delay_ms as f64 * self.jitter_factor) as u64;
        let jitter = rand::rng().random_range(0..=jitter_range);
        delay_ms.saturating_add(jitter)
    }
}
