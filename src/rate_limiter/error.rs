//! # Error Types
//!
//! Everything that can go wrong around a rate-limited call falls into one of
//! three buckets:
//!
//! ```text
//!     caller ──► execute() ──► work()
//!                   │            │
//!                   │            └──► ExecuteError::Work(E)      (forwarded unchanged)
//!                   │                   └─ E::is_rate_limited()  (recorded, still forwarded)
//!                   │
//!                   └──────────────► ExecuteError::Limiter(LimiterError)
//!                                       ├─ Stopped     (limiter shut down)
//!                                       └─ Abandoned   (work panicked)
//! ```
//!
//! The limiter never retries. Detecting an upstream rate limit only feeds the
//! statistics; what to do about it is the caller's decision.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by the limiter itself, independent of the work it runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimiterError {
    /// The configuration failed validation.
    #[error("invalid rate limiter configuration: {0}")]
    InvalidConfig(&'static str),

    /// The limiter was stopped before (or while) the request was queued.
    #[error("rate limiter for `{api}` has been stopped")]
    Stopped {
        /// API identity of the stopped limiter.
        api: String,
    },

    /// The request was admitted but its work never produced a result.
    #[error("request for `{api}` was abandoned before producing a result")]
    Abandoned {
        /// API identity of the limiter that ran the work.
        api: String,
    },

    /// A limiter was started outside of a tokio runtime.
    #[error("no tokio runtime available to drive the scheduler")]
    NoRuntime,

    /// A priority string did not match `high`, `normal` or `low`.
    #[error("unknown priority `{0}`, expected `high`, `normal` or `low`")]
    InvalidPriority(String),
}

impl LimiterError {
    /// Returns `true` for [`LimiterError::Stopped`].
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }
}

/// Error returned by [`RateLimiter::execute`](crate::RateLimiter::execute).
///
/// `Work` carries the work's own error untouched, so callers can match on
/// their error type exactly as if they had called the API directly.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// The unit of work failed.
    #[error("{0}")]
    Work(E),

    /// The limiter could not run the work.
    #[error(transparent)]
    Limiter(#[from] LimiterError),
}

impl<E> ExecuteError<E> {
    /// Returns the work error, if that is what this is.
    pub fn into_work(self) -> Option<E> {
        match self {
            Self::Work(err) => Some(err),
            Self::Limiter(_) => None,
        }
    }

    /// Returns the limiter error, if that is what this is.
    pub fn as_limiter(&self) -> Option<&LimiterError> {
        match self {
            Self::Work(_) => None,
            Self::Limiter(err) => Some(err),
        }
    }

    /// Returns `true` if the limiter was stopped.
    pub fn is_stopped(&self) -> bool {
        self.as_limiter().is_some_and(LimiterError::is_stopped)
    }
}

/// Structured failure of an upstream API call.
///
/// Build one from the HTTP status of the response with
/// [`ApiError::from_status`] and the limiter will classify 429s without
/// having to look at the message text.
///
/// ```rust
/// use tollgate::{ApiError, RateLimitSignal};
///
/// let err = ApiError::from_status(429, "slow down");
/// assert!(err.is_rate_limited());
///
/// let err = ApiError::from_status(500, "boom");
/// assert!(!err.is_rate_limited());
/// ```
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The provider rejected the call because of its own rate limits.
    #[error("rate limited by upstream API")]
    RateLimited {
        /// Value of a `Retry-After` hint, when the provider sent one.
        retry_after: Option<Duration>,
    },

    /// Non-success HTTP response.
    #[error("upstream API returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Anything else (transport failure, parse error, ...).
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Maps an HTTP status to an error, treating 429 as a rate limit.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status == 429 {
            Self::RateLimited { retry_after: None }
        } else {
            Self::Http {
                status,
                message: message.into(),
            }
        }
    }

    /// Attaches a retry hint to a [`ApiError::RateLimited`] error.
    ///
    /// Other variants are returned unchanged.
    pub fn with_retry_after(self, retry_after: Duration) -> Self {
        match self {
            Self::RateLimited { .. } => Self::RateLimited {
                retry_after: Some(retry_after),
            },
            other => other,
        }
    }
}

/// Tells the limiter whether a failed call was throttled upstream.
///
/// Implemented structurally for [`ApiError`]. Foreign error types that only
/// carry a message fall back to [`mentions_rate_limit`].
pub trait RateLimitSignal: fmt::Display {
    /// Returns `true` when the failure was caused by upstream throttling.
    fn is_rate_limited(&self) -> bool;
}

impl RateLimitSignal for ApiError {
    fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Http { status: 429, .. }
        )
    }
}

impl RateLimitSignal for String {
    fn is_rate_limited(&self) -> bool {
        mentions_rate_limit(self)
    }
}

impl RateLimitSignal for &'static str {
    fn is_rate_limited(&self) -> bool {
        mentions_rate_limit(self)
    }
}

impl RateLimitSignal for std::io::Error {
    fn is_rate_limited(&self) -> bool {
        mentions_rate_limit(&self.to_string())
    }
}

impl RateLimitSignal for Box<dyn std::error::Error + Send + Sync> {
    fn is_rate_limited(&self) -> bool {
        mentions_rate_limit(&self.to_string())
    }
}

/// Message heuristic for errors without structure.
///
/// Matches `429`, `rate limit` and `too many requests`, ignoring case.
pub fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
}
