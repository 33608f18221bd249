//! Tokens-per-minute budget limiter.
//!
//! Caps consumed model tokens over a rolling one-minute window, independent
//! of request count: some requests consume many tokens, others few. Local
//! tracking is only an approximation of server-side accounting, so the
//! remote service's own quota headers can override it through
//! [`TokenBudgetLimiter::set_current_usage`].

mod window;


use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use window::{BudgetWindow, DebitOutcome};

/// Window checks before a debit gives up with `ResourceExhausted`. Bounded
/// because clock skew or pathological scheduling could otherwise loop
/// forever.
const MAX_WINDOW_CHECKS: u32 = 3;

/// Rolling per-minute cap on model-token consumption.
///
/// A debit that the current window cannot cover suspends (or sleeps) the
/// caller until the window rolls over, retrying the whole check up to three
/// times. A single debit larger than the entire limit fails fast with
/// [`DispatchError::InvalidArgument`] -- no amount of waiting could satisfy
/// it. Safe under heavy concurrent use; the lock guards only the O(1)
/// check-and-mutate, never the wait.
#[derive(Debug)]
pub struct TokenBudgetLimiter {
    window: Mutex<BudgetWindow>,
    /// Runs under the lock after each window wait, standing in for a
    /// competing debit that lands between wake-up and re-check.
    #[cfg(test)]
    contention_hook: Option<fn(&mut BudgetWindow)>,
}

impl TokenBudgetLimiter {
    /// Create a limiter with the given per-minute token limit.
    ///
    /// Fails with `InvalidArgument` when the limit is zero.
    pub fn new(limit_per_minute: u64) -> DispatchResult<Self> {
        if limit_per_minute == 0 {
            return Err(DispatchError::invalid_argument(
                "tokens-per-minute limit must be greater than zero",
            ));
        }
        Ok(Self {
            window: Mutex::new(BudgetWindow::new(limit_per_minute, Instant::now())),
            #[cfg(test)]
            contention_hook: None,
        })
    }

    #[cfg(test)]
    fn with_contention_hook(mut self, hook: fn(&mut BudgetWindow)) -> Self {
        self.contention_hook = Some(hook);
        self
    }

    #[cfg(test)]
    fn run_contention_hook(&self) {
        if let Some(hook) = self.contention_hook {
            hook(&mut *self.window.lock());
        }
    }

    /// The configured per-minute limit.
    pub fn limit(&self) -> u64 {
        self.window.lock().limit()
    }

    /// Tokens still available in the current window.
    pub fn remaining(&self) -> u64 {
        self.window.lock().remaining(Instant::now())
    }

    /// Override the locally tracked remainder with the value reported by the
    /// remote service (clamped to the limit).
    pub fn set_current_usage(&self, remaining: u64) {
        self.window.lock().set_remaining(remaining);
    }

    /// One-time override of the configured limit, for a dynamically
    /// negotiated quota. Only the first caller's value takes effect;
    /// returns whether this call was the effective one.
    pub fn reset_once(&self, new_limit_per_minute: u64) -> bool {
        self.window.lock().reset_once(new_limit_per_minute)
    }

    /// One bounded check under the lock.
    fn check(&self, tokens: u64) -> DispatchResult<DebitOutcome> {
        let mut window = self.window.lock();
        if tokens > window.limit() {
            return Err(DispatchError::invalid_argument(format!(
                "debit of {} tokens exceeds the entire per-minute budget of {}",
                tokens,
                window.limit()
            )));
        }
        Ok(window.debit(tokens, Instant::now()))
    }

    /// Debit `tokens`, suspending the calling task while the window is
    /// short.
    pub async fn debit(&self, tokens: u64) -> DispatchResult<()> {
        let mut checks = 0;
        loop {
            match self.check(tokens)? {
                DebitOutcome::Granted => return Ok(()),
                DebitOutcome::WaitUntil(boundary) => {
                    checks += 1;
                    if checks >= MAX_WINDOW_CHECKS {
                        warn!(tokens, checks, "token budget still short after bounded waits");
                        return Err(DispatchError::ResourceExhausted(format!(
                            "budget for {tokens} tokens not available after {checks} window checks"
                        )));
                    }
                    debug!(tokens, checks, "token budget short; waiting for window rollover");
                    tokio::time::sleep_until(boundary).await;
                    #[cfg(test)]
                    self.run_contention_hook();
                }
            }
        }
    }

    /// Blocking form of [`debit`](Self::debit): identical contract, sleeping
    /// the OS thread instead of suspending the task.
    pub fn debit_blocking(&self, tokens: u64) -> DispatchResult<()> {
        let mut checks = 0;
        loop {
            match self.check(tokens)? {
                DebitOutcome::Granted => return Ok(()),
                DebitOutcome::WaitUntil(boundary) => {
                    checks += 1;
                    if checks >= MAX_WINDOW_CHECKS {
                        warn!(tokens, checks, "token budget still short after bounded waits");
                        return Err(DispatchError::ResourceExhausted(format!(
                            "budget for {tokens} tokens not available after {checks} window checks"
                        )));
                    }
                    debug!(tokens, checks, "token budget short; waiting for window rollover");
                    std::thread::sleep(boundary.saturating_duration_since(Instant::now()));
                    #[cfg(test)]
                    self.run_contention_hook();
                }
            }
        }
    }
}
