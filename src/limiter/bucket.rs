//! Token bucket state machine.
//!
//! Pure check-and-mutate logic shared by the blocking and suspending fronts
//! in the parent module. Admission uses reservations: a caller that finds
//! the bucket empty consumes the next token to accrue and is told how long
//! to wait for it. Successive reservations hand out monotonically later
//! wake times, which gives waiters FIFO release without holding any lock
//! across the wait.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub(super) struct TokenBucket {
    /// Maximum burst. 1 for strict pacing (qps <= 1), else the configured
    /// qps.
    capacity: f64,
    /// Tokens accrued per second.
    refill_rate: f64,
    /// Currently available tokens, always in `0.0..=capacity`.
    tokens: f64,
    /// Refill high-water mark. Pushed into the future by a reservation so
    /// later callers pace off the reserved token, not wall-clock now.
    last_refill: Instant,
}

impl TokenBucket {
    /// Build a bucket for the given positive qps, full at `now`.
    pub fn new(query_per_second: f64, now: Instant) -> Self {
        let capacity = query_per_second.max(1.0);
        Self {
            capacity,
            refill_rate: query_per_second,
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Debit one token, or reserve the next one to accrue.
    ///
    /// Returns `None` when admission is immediate, otherwise the duration
    /// the caller must wait before proceeding. The reserved token is already
    /// consumed; the caller only needs to sleep, not re-check.
    pub fn reserve(&mut self, now: Instant) -> Option<Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return None;
        }
        let deficit = 1.0 - self.tokens;
        let ready_at = self.last_refill + Duration::from_secs_f64(deficit / self.refill_rate);
        self.tokens = 0.0;
        self.last_refill = ready_at;
        Some(ready_at.saturating_duration_since(now))
    }

    /// Tokens available at `now`, after refill.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_pacing_reserves_one_interval_per_token() {
        // qps 0.5: capacity 1, one token every 2 seconds.
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(0.5, t0);

        assert_eq!(bucket.reserve(t0), None);
        assert_eq!(bucket.reserve(t0), Some(Duration::from_secs(2)));
        // The third caller paces off the second's reservation.
        assert_eq!(bucket.reserve(t0), Some(Duration::from_secs(4)));
    }

    #[test]
    fn burst_mode_admits_capacity_then_paces() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(4.0, t0);

        for _ in 0..4 {
            assert_eq!(bucket.reserve(t0), None);
        }
        let wait = bucket.reserve(t0).expect("bucket should be empty");
        assert_eq!(wait, Duration::from_secs_f64(0.25));
    }

    #[test]
    fn refill_is_monotonic_and_capped() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(2.0, t0);

        assert_eq!(bucket.reserve(t0), None);
        assert_eq!(bucket.reserve(t0), None);
        assert!(bucket.available(t0) < 1.0);

        // Half a second refills one token at 2 qps.
        let t1 = t0 + Duration::from_millis(500);
        assert!((bucket.available(t1) - 1.0).abs() < 1e-9);

        // A long idle period caps at capacity.
        let t2 = t0 + Duration::from_secs(3600);
        assert!((bucket.available(t2) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reservations_release_in_fifo_order() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1.0, t0);
        bucket.reserve(t0);

        let first = bucket.reserve(t0).expect("should wait");
        let second = bucket.reserve(t0).expect("should wait");
        let third = bucket.reserve(t0).expect("should wait");
        assert!(first < second);
        assert!(second < third);
    }

    #[test]
    fn waiter_arriving_mid_reservation_waits_the_remainder() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1.0, t0);
        bucket.reserve(t0);
        assert_eq!(bucket.reserve(t0), Some(Duration::from_secs(1)));

        // Arrives 400ms in; the next token lands at t0+2s.
        let t1 = t0 + Duration::from_millis(400);
        assert_eq!(bucket.reserve(t1), Some(Duration::from_millis(1600)));
    }
}
