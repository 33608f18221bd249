//! Retry policy and execution for transport calls.
//!
//! A [`RetryExecutor`] drives one logical request attempt-by-attempt until
//! success, policy exhaustion, or a non-retryable failure. Expired
//! credentials are refreshed and retried outside the numeric attempt budget
//! so re-authentication cannot starve genuine retries.

mod executor;


pub use executor::{BlockingCredentialSource, CredentialSource, RetryExecutor};

use std::collections::HashSet;
use std::time::Duration;

use crate::error::DispatchError;

/// Fallback delay between attempts when `backoff_factor` is zero.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default bound on credential refreshes per logical request.
const DEFAULT_MAX_AUTH_REFRESHES: u32 = 3;

/// Service codes retried by default. Callers supply their provider's own
/// codes through [`crate::config::DispatchConfig`].
pub fn default_retryable_codes() -> HashSet<i64> {
    [429, 500, 502, 503, 504].into_iter().collect()
}

/// How to retry a failing request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Must be at least 1.
    pub max_attempts: u32,
    /// Deadline applied to each attempt individually. Enforced by the async
    /// executor; blocking transports carry their own deadline and surface
    /// [`DispatchError::Timeout`] themselves.
    pub timeout_per_attempt: Option<Duration>,
    /// Seconds multiplied by the 1-based index of the failed attempt to get
    /// the pre-retry delay. Zero falls back to a fixed 500 ms.
    pub backoff_factor: f64,
    /// Service codes treated as transient.
    pub retryable_codes: HashSet<i64>,
    /// Whether an expired credential triggers refresh-and-retry.
    pub retry_on_auth_expiry: bool,
    /// Bound on refresh-and-retry cycles, counted separately from
    /// `max_attempts`.
    pub max_auth_refreshes: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_per_attempt: Some(Duration::from_secs(60)),
            backoff_factor: 0.0,
            retryable_codes: default_retryable_codes(),
            retry_on_auth_expiry: true,
            max_auth_refreshes: DEFAULT_MAX_AUTH_REFRESHES,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and defaults elsewhere.
    pub fn limited(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the total attempt budget.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the per-attempt deadline.
    pub fn with_timeout_per_attempt(mut self, timeout: Option<Duration>) -> Self {
        self.timeout_per_attempt = timeout;
        self
    }

    /// Set the linear backoff factor in seconds.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Replace the retryable service code set.
    pub fn with_retryable_codes(mut self, codes: HashSet<i64>) -> Self {
        self.retryable_codes = codes;
        self
    }

    /// Enable or disable refresh-and-retry on expired credentials.
    pub fn with_retry_on_auth_expiry(mut self, retry: bool) -> Self {
        self.retry_on_auth_expiry = retry;
        self
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-based). Non-decreasing in `attempt` whenever the factor is
    /// positive.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_factor > 0.0 {
            Duration::from_secs_f64(self.backoff_factor * attempt as f64)
        } else {
            MIN_RETRY_DELAY
        }
    }
}

/// Classification of a failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// May succeed on retry.
    Transient,
    /// Credential refresh then immediate retry.
    AuthExpired,
    /// Will not succeed on retry; propagate immediately.
    Permanent,
}

/// Classify a failure against a policy's retryable code set.
pub fn classify(error: &DispatchError, policy: &RetryPolicy) -> ErrorClass {
    match error {
        DispatchError::Transport(_) | DispatchError::Timeout(_) => ErrorClass::Transient,
        DispatchError::Service { code, .. } if policy.retryable_codes.contains(code) => {
            ErrorClass::Transient
        }
        DispatchError::AuthExpired => ErrorClass::AuthExpired,
        _ => ErrorClass::Permanent,
    }
}
