//! Retry with exponential backoff
//!
//! Shared by every component that owns a retry budget against the remote
//! drive. Only transient failures are retried; `RateLimited` waits at least
//! as long as the provider asked for.
//!
//! Default schedule: 1s, 2s, 4s, 8s, 16s (max 5 retries, capped at 60s).

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::RemoteError;

/// Upper bound applied to Retry-After hints
const MAX_RETRY_AFTER_SECS: u64 = 3600;

/// Backoff parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap for the exponential delay (provider hints may exceed it)
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    ///
    /// `hint` is a provider-mandated minimum and wins over the cap.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let exponential = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        match hint {
            Some(hint) => exponential.max(hint),
            None => exponential,
        }
    }
}

/// Executes an async remote operation with exponential backoff retry
///
/// Non-transient errors are returned immediately. After the budget is
/// exhausted the last error is returned as-is.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    f: F,
) -> Result<T, RemoteError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries && err.is_transient() => {
                let delay = policy.delay_for(attempt, err.retry_hint());
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// The header can be either:
/// - An integer number of seconds (e.g., "30")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2027 23:59:59 GMT") - parsed as seconds from now
///
/// Either form is capped at one hour. Falls back to the default duration
/// if parsing fails or the date is in the past.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds.min(MAX_RETRY_AFTER_SECS));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            if let Ok(secs) = u64::try_from((target - now).num_seconds()) {
                return Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS));
            }
        }
    }

    warn!(value, "Could not parse Retry-After value, using default");
    default
}
