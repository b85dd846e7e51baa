//! # Request Queue
//!
//! Pending work for one limiter, ordered by priority and then by arrival.
//!
//! ```text
//!     key = (priority ↓, sequence ↑)
//!
//!     ┌──────────┬──────────┬──────────┬──────────┐
//!     │ High #4  │ Normal #1│ Normal #3│ Low #2   │ ──► head is admitted first
//!     └──────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! The sequence number makes the order stable: two requests of the same
//! priority are always admitted in the order they were enqueued.

use super::error::LimiterError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

/// Scheduling priority of a request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low = 1,
    /// Default.
    #[default]
    Normal = 2,
    /// User-facing work that should jump the queue.
    High = 3,
}

impl Priority {
    /// Numeric rank: high=3, normal=2, low=1.
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            _ => Err(LimiterError::InvalidPriority(s.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-call options for [`RateLimiter::execute`](crate::RateLimiter::execute).
///
/// ```rust
/// use tollgate::{Priority, RequestOptions};
///
/// let options = RequestOptions::new()
///     .with_priority(Priority::High)
///     .with_estimated_cost(1_500.0)
///     .with_metadata("summarize transcript chunk 3");
///
/// assert_eq!(options.priority, Priority::High);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    /// Queue priority.
    pub priority: Priority,
    /// Cost units the call will draw from the cost budget; 0 if unknown.
    pub estimated_cost: f64,
    /// Opaque caller tag, carried into log lines.
    pub metadata: Option<String>,
}

impl RequestOptions {
    /// Normal priority, zero cost, no metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for high priority.
    pub fn high() -> Self {
        Self::new().with_priority(Priority::High)
    }

    /// Shorthand for low priority.
    pub fn low() -> Self {
        Self::new().with_priority(Priority::Low)
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the estimated cost.
    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost;
        self
    }

    /// Attaches an opaque tag.
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Estimated cost with negative and non-finite values mapped to zero.
    pub fn sanitized_cost(&self) -> f64 {
        if self.estimated_cost.is_finite() && self.estimated_cost > 0.0 {
            self.estimated_cost
        } else {
            0.0
        }
    }
}

/// How a unit of work ended, as seen by the statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed { rate_limited: bool, message: String },
}

/// What an executed job hands back to the limiter.
///
/// The limiter settles statistics from `outcome` first, then calls
/// `deliver` to resolve the caller's ticket.
pub(crate) struct Completion {
    pub(crate) outcome: Outcome,
    pub(crate) deliver: Box<dyn FnOnce() + Send>,
}

/// Type-erased unit of work.
pub(crate) type Job = Box<dyn FnOnce() -> BoxFuture<'static, Completion> + Send>;

/// A request waiting for admission.
pub(crate) struct QueuedRequest {
    pub(crate) job: Job,
    pub(crate) priority: Priority,
    pub(crate) estimated_cost: f64,
    pub(crate) enqueued_at: Instant,
    pub(crate) metadata: Option<String>,
}

impl QueuedRequest {
    pub(crate) fn new(job: Job, options: RequestOptions, enqueued_at: Instant) -> Self {
        Self {
            job,
            priority: options.priority,
            estimated_cost: options.sanitized_cost(),
            enqueued_at,
            metadata: options.metadata,
        }
    }

    /// Label used in log lines.
    pub(crate) fn label(&self) -> &str {
        self.metadata.as_deref().unwrap_or("-")
    }
}

impl fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedRequest")
            .field("priority", &self.priority)
            .field("estimated_cost", &self.estimated_cost)
            .field("enqueued_at", &self.enqueued_at)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Ordering key: higher priority first, then lower sequence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    priority: Reverse<Priority>,
    sequence: u64,
}

impl QueueKey {
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Stable priority queue of pending requests.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    entries: BTreeMap<QueueKey, QueuedRequest>,
    next_sequence: u64,
}

impl RequestQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a request behind everything of equal or higher priority.
    pub(crate) fn push(&mut self, request: QueuedRequest) -> QueueKey {
        let key = QueueKey {
            priority: Reverse(request.priority),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, request);
        key
    }

    /// The request that would be admitted next under strict ordering.
    pub(crate) fn peek(&self) -> Option<(QueueKey, &QueuedRequest)> {
        self.entries
            .first_key_value()
            .map(|(key, request)| (*key, request))
    }

    /// The first request, in queue order, for which `fits` returns `true`.
    pub(crate) fn find(&self, mut fits: impl FnMut(&QueuedRequest) -> bool) -> Option<QueueKey> {
        self.entries
            .iter()
            .find(|(_, request)| fits(request))
            .map(|(key, _)| *key)
    }

    pub(crate) fn remove(&mut self, key: QueueKey) -> Option<QueuedRequest> {
        self.entries.remove(&key)
    }

    /// Removes and returns everything, in queue order.
    pub(crate) fn drain_all(&mut self) -> Vec<QueuedRequest> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
