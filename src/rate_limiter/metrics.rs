//! # Statistics and Status Snapshots
//!
//! Everything a monitoring UI needs to know about one API's limiter.
//!
//! ```text
//!     Limiter Dashboard (openai):
//!     ┌─────────────────────────────────────────┐
//!     │  Queue: 4      In flight: 5/5           │
//!     │  Requests: ▓▓▓░░░░░░░  3.2/10  (32%)    │
//!     │  Cost:     ▓▓▓▓▓▓▓░░░  63k/90k (70%)    │
//!     │                                         │
//!     │  Success Rate: 97.5%                    │
//!     │  Upstream 429s: 1                       │
//!     │  Avg Wait: 812ms                        │
//!     │  Health: ⚠️ Degraded                    │
//!     └─────────────────────────────────────────┘
//! ```
//!
//! [`LimiterStatus`] answers "how much budget is left right now",
//! [`LimiterStats`] answers "what has happened so far". Both serialize with
//! camelCase field names so they can be handed to a UI as-is.

use serde::Serialize;
use std::fmt;

/// Remaining budget of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CapacitySnapshot {
    /// Tokens available now.
    pub current: f64,
    /// Bucket capacity.
    pub max: f64,
    /// `current / max` as a percentage.
    pub percent: f64,
}

impl CapacitySnapshot {
    pub(crate) fn new(current: f64, max: f64) -> Self {
        let percent = if max > 0.0 {
            (current / max * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };
        Self {
            current,
            max,
            percent,
        }
    }
}

/// Point-in-time view of a limiter's budgets and load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStatus {
    /// API identity.
    pub api: String,
    /// Requests waiting for admission.
    pub queue_length: usize,
    /// Requests currently executing.
    pub active_requests: usize,
    /// Request bucket.
    pub request_capacity: CapacitySnapshot,
    /// Cost bucket.
    pub cost_capacity: CapacitySnapshot,
}

/// Running counters of a limiter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStats {
    /// Requests submitted.
    pub total_requests: u64,
    /// Work that completed successfully.
    pub successful_requests: u64,
    /// Work that failed, for any reason.
    pub failed_requests: u64,
    /// Failures the upstream API attributed to its own rate limiting.
    pub rate_limited_requests: u64,
    /// Sum of time spent queued by admitted requests.
    pub total_wait_time_ms: u64,
    /// Sum of estimated cost drawn from the cost budget.
    pub total_cost_units_used: f64,
    /// Requests waiting for admission.
    pub queue_length: usize,
    /// Requests currently executing.
    pub active_requests: usize,
    /// `total_wait_time_ms / admitted_requests`.
    pub average_wait_time_ms: f64,
    /// Requests that left the queue and started executing.
    pub admitted_requests: u64,
}

impl LimiterStats {
    /// Requests that have finished, successfully or not.
    #[inline]
    pub fn completed_requests(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }

    /// Fraction of finished requests that succeeded; 1.0 before any finish.
    pub fn success_rate(&self) -> f64 {
        let completed = self.completed_requests();
        if completed == 0 {
            1.0
        } else {
            self.successful_requests as f64 / completed as f64
        }
    }

    /// Fraction of finished requests rejected by upstream rate limiting.
    pub fn rate_limited_ratio(&self) -> f64 {
        let completed = self.completed_requests();
        if completed == 0 {
            0.0
        } else {
            self.rate_limited_requests as f64 / completed as f64
        }
    }

    /// Quick assessment of how well the local budget matches the provider.
    ///
    /// - **Critical**: more than 20% of finished calls were throttled upstream
    /// - **Degraded**: any upstream throttling, or success rate below 80%
    /// - **Healthy**: otherwise
    pub fn health_status(&self) -> HealthStatus {
        if self.rate_limited_ratio() > 0.2 {
            HealthStatus::Critical
        } else if self.rate_limited_requests > 0 || self.success_rate() < 0.8 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable report.
    ///
    /// # Example Output
    ///
    /// ```text
    /// Limiter Stats:
    /// ├─ Requests:
    /// │  ├─ Total: 120
    /// │  ├─ Succeeded: 117
    /// │  ├─ Failed: 3
    /// │  └─ Upstream Rate Limited: 1
    /// ├─ Queue:
    /// │  ├─ Waiting: 4
    /// │  ├─ In Flight: 5
    /// │  └─ Average Wait: 812.00ms
    /// └─ Health:
    ///    ├─ Success Rate: 97.50%
    ///    ├─ Cost Used: 63000.0
    ///    └─ Status: Degraded
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "Limiter Stats:\n\
             ├─ Requests:\n\
             │  ├─ Total: {}\n\
             │  ├─ Succeeded: {}\n\
             │  ├─ Failed: {}\n\
             │  └─ Upstream Rate Limited: {}\n\
             ├─ Queue:\n\
             │  ├─ Waiting: {}\n\
             │  ├─ In Flight: {}\n\
             │  └─ Average Wait: {:.2}ms\n\
             └─ Health:\n\
                ├─ Success Rate: {:.2}%\n\
                ├─ Cost Used: {:.1}\n\
                └─ Status: {:?}",
            self.total_requests,
            self.successful_requests,
            self.failed_requests,
            self.rate_limited_requests,
            self.queue_length,
            self.active_requests,
            self.average_wait_time_ms,
            self.success_rate() * 100.0,
            self.total_cost_units_used,
            self.health_status(),
        )
    }
}

impl fmt::Display for LimiterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Counters owned by a limiter, mutated under its state lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub(crate) total_requests: u64,
    pub(crate) successful_requests: u64,
    pub(crate) failed_requests: u64,
    pub(crate) rate_limited_requests: u64,
    pub(crate) admitted_requests: u64,
    pub(crate) total_wait_time_ms: u64,
    pub(crate) total_cost_units_used: f64,
}

impl Counters {
    pub(crate) fn record_submitted(&mut self) {
        self.total_requests += 1;
    }

    pub(crate) fn record_admitted(&mut self, wait_ms: u64, cost: f64) {
        self.admitted_requests += 1;
        self.total_wait_time_ms = self.total_wait_time_ms.saturating_add(wait_ms);
        self.total_cost_units_used += cost;
    }

    pub(crate) fn record_success(&mut self) {
        self.successful_requests += 1;
    }

    pub(crate) fn record_failure(&mut self, rate_limited: bool) {
        self.failed_requests += 1;
        if rate_limited {
            self.rate_limited_requests += 1;
        }
    }

    pub(crate) fn snapshot(&self, queue_length: usize, active_requests: usize) -> LimiterStats {
        let average_wait_time_ms = if self.admitted_requests == 0 {
            0.0
        } else {
            self.total_wait_time_ms as f64 / self.admitted_requests as f64
        };

        LimiterStats {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            rate_limited_requests: self.rate_limited_requests,
            total_wait_time_ms: self.total_wait_time_ms,
            total_cost_units_used: self.total_cost_units_used,
            queue_length,
            active_requests,
            average_wait_time_ms,
            admitted_requests: self.admitted_requests,
        }
    }
}

/// Why an event was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Periodic scheduler tick.
    Tick,
    /// A request was added to the queue.
    Enqueued,
}

/// Live update broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterEvent {
    /// API identity of the publishing limiter.
    pub api: String,
    /// What triggered the event.
    pub kind: EventKind,
    /// Wall-clock milliseconds since the UNIX epoch.
    pub emitted_at_ms: u64,
    /// Budgets and load.
    pub status: LimiterStatus,
    /// Counters.
    pub stats: LimiterStats,
}

/// Health indicator derived from [`LimiterStats`].
///
/// ```text
///     Healthy ──────► local budget keeps us under the provider's limits
///        │
///     Degraded ─────► the provider pushed back at least once
///        │
///     Critical ─────► the provider is throttling a large share of calls
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// No upstream throttling, good success rate.
    Healthy,
    /// Some upstream throttling or failures.
    Degraded,
    /// Sustained upstream throttling.
    Critical,
}

impl HealthStatus {
    /// Returns true if the status indicates any problems.
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Suggested operator action.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, the provider is pushing back",
            Self::Critical => "Immediate action required: lower requests_per_minute or burst_size",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Degraded => write!(f, "⚠️ Degraded"),
            Self::Critical => write!(f, "🔴 Critical"),
        }
    }
}
