//! Request-rate limiter.
//!
//! Caps the rate of request starts at a configured queries-per-second using
//! a token bucket. The limiter never rejects: backpressure is delay, not
//! error, because request loss is worse than latency for the resource
//! clients sharing it. Both fronts -- [`RateLimiter::acquire`] for tasks and
//! [`RateLimiter::acquire_blocking`] for threads -- share the same bucket
//! state behind one mutex, and neither holds the lock while waiting.

mod bucket;


use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use bucket::TokenBucket;

/// Queries-per-second admission control.
///
/// `qps <= 0` disables limiting entirely (the default): every admission
/// succeeds immediately. `qps <= 1` paces strictly, one request per `1/qps`
/// seconds. `qps > 1` allows bursts up to `qps` while bounding the sustained
/// rate.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Option<Mutex<TokenBucket>>,
}

impl RateLimiter {
    /// Create a limiter for the given qps; non-positive values disable it.
    pub fn new(query_per_second: f64) -> Self {
        if query_per_second <= 0.0 {
            return Self::disabled();
        }
        Self {
            bucket: Some(Mutex::new(TokenBucket::new(
                query_per_second,
                Instant::now(),
            ))),
        }
    }

    /// A limiter that admits everything immediately.
    pub fn disabled() -> Self {
        Self { bucket: None }
    }

    /// Whether admission control is active.
    pub fn is_enabled(&self) -> bool {
        self.bucket.is_some()
    }

    /// Check-and-debit under the lock; the returned wait happens outside it.
    fn reserve(&self) -> Option<Duration> {
        let bucket = self.bucket.as_ref()?;
        bucket.lock().reserve(Instant::now())
    }

    /// Admit one request, suspending the calling task while pacing.
    pub async fn acquire(&self) {
        if let Some(wait) = self.reserve() {
            debug!(wait_secs = wait.as_secs_f64(), "rate limiter pacing request");
            tokio::time::sleep(wait).await;
        }
    }

    /// Admit one request, sleeping the calling thread while pacing.
    pub fn acquire_blocking(&self) {
        if let Some(wait) = self.reserve() {
            debug!(wait_secs = wait.as_secs_f64(), "rate limiter pacing request");
            std::thread::sleep(wait);
        }
    }

    /// Tokens currently available; infinite when disabled.
    pub fn available_tokens(&self) -> f64 {
        match &self.bucket {
            Some(bucket) => bucket.lock().available(Instant::now()),
            None => f64::INFINITY,
        }
    }
}
