//! Rolling-minute budget window state machine.
//!
//! Pure check-and-mutate logic shared by the blocking and suspending fronts
//! in the parent module. All fields, including the one-shot reset flag, live
//! behind the parent's single mutex.

use std::time::Duration;

use tokio::time::Instant;

/// Length of the budget window.
pub(super) const WINDOW: Duration = Duration::from_secs(60);

/// Outcome of a single debit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DebitOutcome {
    Granted,
    /// Budget is short; retry once the window rolls over at this instant.
    WaitUntil(Instant),
}

#[derive(Debug)]
pub(super) struct BudgetWindow {
    limit: u64,
    /// Always in `0..=limit`.
    remaining: u64,
    window_start: Instant,
    /// Guards [`Self::reset_once`] idempotence.
    has_been_reset: bool,
}

impl BudgetWindow {
    pub fn new(limit_per_minute: u64, now: Instant) -> Self {
        Self {
            limit: limit_per_minute,
            remaining: limit_per_minute,
            window_start: now,
            has_been_reset: false,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.saturating_duration_since(self.window_start) >= WINDOW {
            self.remaining = self.limit;
            self.window_start = now;
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn remaining(&mut self, now: Instant) -> u64 {
        self.roll(now);
        self.remaining
    }

    /// Debit `tokens` if the window covers them, else report when the next
    /// window opens.
    pub fn debit(&mut self, tokens: u64, now: Instant) -> DebitOutcome {
        self.roll(now);
        if tokens <= self.remaining {
            self.remaining -= tokens;
            DebitOutcome::Granted
        } else {
            DebitOutcome::WaitUntil(self.window_start + WINDOW)
        }
    }

    /// Override the locally tracked remainder with an authoritative value.
    pub fn set_remaining(&mut self, remaining: u64) {
        self.remaining = remaining.min(self.limit);
    }

    /// Pull the window start back so the next boundary lands sooner.
    #[cfg(test)]
    pub(super) fn rewind_start(&mut self, by: Duration) {
        self.window_start -= by;
    }

    /// One-time limit override; only the first caller takes effect.
    pub fn reset_once(&mut self, new_limit: u64) -> bool {
        if self.has_been_reset {
            return false;
        }
        self.has_been_reset = true;
        self.limit = new_limit;
        self.remaining = self.remaining.min(new_limit);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debits_within_window_are_granted() {
        let t0 = Instant::now();
        let mut window = BudgetWindow::new(500, t0);

        for _ in 0..5 {
            assert_eq!(window.debit(100, t0), DebitOutcome::Granted);
        }
        assert_eq!(window.remaining(t0), 0);
        assert_eq!(window.debit(1, t0), DebitOutcome::WaitUntil(t0 + WINDOW));
    }

    #[test]
    fn window_rolls_over_after_a_minute() {
        let t0 = Instant::now();
        let mut window = BudgetWindow::new(100, t0);
        assert_eq!(window.debit(100, t0), DebitOutcome::Granted);

        let t1 = t0 + WINDOW;
        assert_eq!(window.debit(100, t1), DebitOutcome::Granted);
        assert_eq!(window.remaining(t1), 0);
    }

    #[test]
    fn set_remaining_clamps_to_limit() {
        let t0 = Instant::now();
        let mut window = BudgetWindow::new(100, t0);
        window.set_remaining(1_000_000);
        assert_eq!(window.remaining(t0), 100);
        window.set_remaining(30);
        assert_eq!(window.remaining(t0), 30);
    }

    #[test]
    fn reset_once_takes_effect_exactly_once() {
        let t0 = Instant::now();
        let mut window = BudgetWindow::new(100, t0);
        assert!(window.reset_once(50));
        assert!(!window.reset_once(9999));
        assert_eq!(window.limit(), 50);
        assert_eq!(window.remaining(t0), 50);
    }
}
