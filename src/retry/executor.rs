//! Attempt-by-attempt execution of a single logical request.

use std::future::Future;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::{ErrorClass, RetryPolicy, classify};
use crate::error::{DispatchError, DispatchResult};

/// Refreshes an expired credential so an `AuthExpired` failure can be
/// retried.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Re-authenticate. The next attempt runs immediately after this
    /// returns.
    async fn refresh(&self) -> DispatchResult<()>;
}

/// Blocking-mode counterpart of [`CredentialSource`].
pub trait BlockingCredentialSource: Send + Sync {
    /// Re-authenticate on the calling thread.
    fn refresh(&self) -> DispatchResult<()>;
}

/// Runs one logical request until success, retry exhaustion, or a
/// non-retryable failure.
///
/// Both forms share the same [`RetryPolicy`] semantics; they differ only in
/// how they suspend between attempts (task yield vs thread sleep) and in who
/// enforces the per-attempt deadline.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor for the given policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy this executor runs under.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `operation` with retries, suspending the task between
    /// attempts.
    ///
    /// Transient failures (transport errors, timeouts, retryable service
    /// codes) are retried after a backoff delay, up to the policy's attempt
    /// budget, then wrapped in [`DispatchError::RetryExhausted`]. An expired
    /// credential triggers a refresh through `credentials` and an immediate
    /// retry that does not consume the attempt budget. Everything else
    /// propagates unchanged.
    pub async fn execute<T, F, Fut>(
        &self,
        credentials: Option<&dyn CredentialSource>,
        mut operation: F,
    ) -> DispatchResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DispatchResult<T>>,
    {
        let mut attempts = 0u32;
        let mut refreshes = 0u32;

        loop {
            let outcome = match self.policy.timeout_per_attempt {
                Some(limit) => match timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(DispatchError::Timeout(limit)),
                },
                None => operation().await,
            };

            let error = match outcome {
                Ok(value) => {
                    if attempts > 0 {
                        debug!(attempts = attempts + 1, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match classify(&error, &self.policy) {
                ErrorClass::AuthExpired if self.policy.retry_on_auth_expiry => {
                    let Some(source) = credentials else {
                        return Err(error);
                    };
                    refreshes += 1;
                    if refreshes > self.policy.max_auth_refreshes {
                        warn!(refreshes, "credential refresh bound exceeded");
                        return Err(DispatchError::RetryExhausted {
                            attempts: attempts + 1,
                            source: Box::new(error),
                        });
                    }
                    warn!(refreshes, "credential expired; refreshing before retry");
                    source.refresh().await?;
                    // Refresh retries run immediately and do not consume the
                    // numeric attempt budget.
                }
                ErrorClass::Transient => {
                    attempts += 1;
                    if attempts >= self.policy.max_attempts {
                        warn!(attempts, error = %error, "all retry attempts exhausted");
                        return Err(DispatchError::RetryExhausted {
                            attempts,
                            source: Box::new(error),
                        });
                    }
                    let delay = self.policy.delay_for(attempts);
                    warn!(
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %error,
                        "retrying after transient failure"
                    );
                    sleep(delay).await;
                }
                ErrorClass::AuthExpired | ErrorClass::Permanent => return Err(error),
            }
        }
    }

    /// Blocking form of [`execute`](Self::execute): identical policy
    /// semantics, sleeping the OS thread between attempts.
    ///
    /// The per-attempt deadline is not enforced here -- an arbitrary
    /// synchronous call cannot be interrupted from the outside -- so blocking
    /// transports are expected to carry their own deadline and surface
    /// [`DispatchError::Timeout`], which classifies as transient.
    pub fn execute_blocking<T, F>(
        &self,
        credentials: Option<&dyn BlockingCredentialSource>,
        mut operation: F,
    ) -> DispatchResult<T>
    where
        F: FnMut() -> DispatchResult<T>,
    {
        let mut attempts = 0u32;
        let mut refreshes = 0u32;

        loop {
            let error = match operation() {
                Ok(value) => {
                    if attempts > 0 {
                        debug!(attempts = attempts + 1, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match classify(&error, &self.policy) {
                ErrorClass::AuthExpired if self.policy.retry_on_auth_expiry => {
                    let Some(source) = credentials else {
                        return Err(error);
                    };
                    refreshes += 1;
                    if refreshes > self.policy.max_auth_refreshes {
                        warn!(refreshes, "credential refresh bound exceeded");
                        return Err(DispatchError::RetryExhausted {
                            attempts: attempts + 1,
                            source: Box::new(error),
                        });
                    }
                    warn!(refreshes, "credential expired; refreshing before retry");
                    source.refresh()?;
                }
                ErrorClass::Transient => {
                    attempts += 1;
                    if attempts >= self.policy.max_attempts {
                        warn!(attempts, error = %error, "all retry attempts exhausted");
                        return Err(DispatchError::RetryExhausted {
                            attempts,
                            source: Box::new(error),
                        });
                    }
                    let delay = self.policy.delay_for(attempts);
                    warn!(
                        attempt = attempts,
                        max_attempts = self.policy.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        error = %error,
                        "retrying after transient failure"
                    );
                    std::thread::sleep(delay);
                }
                ErrorClass::AuthExpired | ErrorClass::Permanent => return Err(error),
            }
        }
    }
}
