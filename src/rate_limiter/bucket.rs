//! # Token Bucket
//!
//! The leaf primitive behind both budgets of a [`RateLimiter`](crate::RateLimiter).
//!
//! ```text
//!     How the bucket moves:
//!
//!     t=0.0s   [■■■■■]  5/5    capacity 5, refill 0.5/s
//!     consume  [■■■□□]  3/5
//!     t=2.0s   [■■■■□]  4/5    +2.0s × 0.5/s = +1
//!     t=10.0s  [■■■■■]  5/5    clamped at capacity
//! ```
//!
//! Refill is lazy: there is no background thread per bucket. Whoever reads or
//! consumes calls [`TokenBucket::refill`] first with the current instant, and
//! the bucket adds whatever accrued since the previous refill.
//!
//! The bucket is not synchronized. The owning limiter keeps it behind its
//! state lock.
//!
//! Tokens accrue as repeated float additions (ten 100ms refills at 1/s land
//! at 0.9999999999999999, not 1.0). Comparisons therefore allow
//! [`TOKEN_EPSILON`] of slack, and [`TokenBucket::has`] and
//! [`TokenBucket::time_until`] always agree on whether a wait is needed.

use std::time::Duration;
use tokio::time::Instant;

/// Slack allowed when comparing a token count against an amount.
pub const TOKEN_EPSILON: f64 = 1e-9;

/// A capped, continuously refilling counter.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(max_tokens: f64, refill_per_second: f64) -> Self {
        Self::with_tokens(max_tokens, refill_per_second, max_tokens, Instant::now())
    }

    /// Creates a bucket holding `tokens` as of `now`.
    ///
    /// Out-of-range values are clamped into `[0, max_tokens]`.
    pub fn with_tokens(max_tokens: f64, refill_per_second: f64, tokens: f64, now: Instant) -> Self {
        let max_tokens = sanitize(max_tokens);
        Self {
            tokens: sanitize(tokens).min(max_tokens),
            max_tokens,
            refill_per_second: sanitize(refill_per_second),
            last_refill: now,
        }
    }

    /// Adds the tokens accrued between the last refill and `now`.
    ///
    /// An instant earlier than the last refill adds nothing and leaves the
    /// refill clock where it was.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let added = elapsed.as_secs_f64() * self.refill_per_second;
        let tokens = sanitize(self.tokens + added);
        self.tokens = if tokens + TOKEN_EPSILON >= self.max_tokens {
            self.max_tokens
        } else {
            tokens
        };
        self.last_refill = now;
    }

    /// Removes `amount` tokens, flooring at zero.
    pub fn consume(&mut self, amount: f64) {
        self.tokens = sanitize(self.tokens - sanitize(amount));
    }

    /// Returns `true` if at least `amount` tokens are available, within
    /// [`TOKEN_EPSILON`].
    #[inline]
    pub fn has(&self, amount: f64) -> bool {
        self.tokens + TOKEN_EPSILON >= amount
    }

    /// Time until `amount` tokens are available at the current refill rate.
    ///
    /// Zero exactly when [`TokenBucket::has`] is true, otherwise at least one
    /// nanosecond. Returns [`Duration::MAX`] when the bucket does not refill
    /// at all.
    pub fn time_until(&self, amount: f64) -> Duration {
        if self.has(amount) {
            return Duration::ZERO;
        }
        if self.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        let deficit = amount - self.tokens;
        Duration::try_from_secs_f64(deficit / self.refill_per_second)
            .unwrap_or(Duration::MAX)
            .max(Duration::from_nanos(1))
    }

    /// Current token count (as of the last refill).
    #[inline]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Bucket capacity.
    #[inline]
    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    /// Refill rate in tokens per second.
    #[inline]
    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }

    /// Instant of the last refill.
    #[inline]
    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}

/// Floors negatives and NaN to zero; leaves everything else alone.
#[inline]
fn sanitize(value: f64) -> f64 {
    if value > 0.0 {
        value
    } else {
        0.0
    }
}
