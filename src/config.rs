//! Dispatch configuration.
//!
//! [`DispatchConfig`] is passed explicitly to each dispatcher at
//! construction; there is no process-wide config singleton, so tests can
//! build independent instances without cross-test leakage. An outer
//! configuration layer owns where the values come from and can deserialize
//! this struct directly.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, DispatchResult};
use crate::retry::{RetryPolicy, default_retryable_codes};

/// Admission and retry knobs consumed by [`crate::dispatch::Dispatcher`].
///
/// # Example
/// ```
/// use inflight::DispatchConfig;
/// use std::time::Duration;
///
/// let config = DispatchConfig::default()
///     .with_query_per_second(10.0)
///     .with_tokens_per_minute(300_000)
///     .with_max_attempts(5)
///     .with_timeout_per_attempt(Some(Duration::from_secs(30)));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Requests-per-second cap. Zero or negative disables request rate
    /// limiting (the default).
    pub query_per_second: f64,
    /// Tokens-per-minute budget. Zero disables token budgeting (the
    /// default).
    pub tokens_per_minute: u64,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Deadline applied to each attempt individually.
    #[serde(with = "humantime_serde")]
    pub timeout_per_attempt: Option<Duration>,
    /// Linear backoff factor in seconds; zero means a fixed minimum delay.
    pub backoff_factor: f64,
    /// Service codes treated as transient.
    pub retryable_codes: HashSet<i64>,
    /// Whether an expired credential triggers refresh-and-retry.
    pub retry_on_auth_expiry: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            query_per_second: 0.0,
            tokens_per_minute: 0,
            max_attempts: 3,
            timeout_per_attempt: Some(Duration::from_secs(60)),
            backoff_factor: 0.0,
            retryable_codes: default_retryable_codes(),
            retry_on_auth_expiry: true,
        }
    }
}

impl DispatchConfig {
    /// No rate or budget limiting; default retry behavior.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Strict pacing with a generous retry budget, for providers with tight
    /// quotas.
    pub fn conservative() -> Self {
        Self {
            query_per_second: 1.0,
            tokens_per_minute: 120_000,
            max_attempts: 5,
            backoff_factor: 1.0,
            ..Default::default()
        }
    }

    /// Set the requests-per-second cap.
    pub fn with_query_per_second(mut self, qps: f64) -> Self {
        self.query_per_second = qps;
        self
    }

    /// Set the tokens-per-minute budget.
    pub fn with_tokens_per_minute(mut self, tpm: u64) -> Self {
        self.tokens_per_minute = tpm;
        self
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

    /// Reject configurations the dispatcher cannot honor.
    pub fn validate(&self) -> DispatchResult<()> {
        if self.max_attempts < 1 {
            return Err(DispatchError::invalid_argument(
                "max_attempts must be at least 1",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(DispatchError::invalid_argument(
                "backoff_factor must be finite and non-negative",
            ));
        }
        if !self.query_per_second.is_finite() {
            return Err(DispatchError::invalid_argument(
                "query_per_second must be finite",
            ));
        }
        Ok(())
    }

    /// The retry policy slice of this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_timeout_per_attempt(self.timeout_per_attempt)
            .with_backoff_factor(self.backoff_factor)
            .with_retryable_codes(self.retryable_codes.clone())
            .with_retry_on_auth_expiry(self.retry_on_auth_expiry)
    }
}
