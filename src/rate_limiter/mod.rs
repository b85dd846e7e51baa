//! # Rate Limiter Module
//!
//! This module provides the internal implementation of per-API admission
//! control. It's organized into several submodules, each responsible for a
//! specific aspect of the system.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── bucket.rs       (Token bucket primitive)
//!     ├── config.rs       (Budgets, presets and validation)
//!     ├── core.rs         (Per-API limiter and its scheduler)
//!     ├── error.rs        (Error types and rate-limit detection)
//!     ├── manager.rs      (API name → limiter registry)
//!     ├── metrics.rs      (Status, statistics and events)
//!     ├── queue.rs        (Priorities and the pending-request queue)
//!     └── utils.rs        (Time helpers)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     execute(api, work)
//!          │
//!          ▼
//!     ┌─────────┐
//!     │ Manager │ ◄── One limiter per API name
//!     └────┬────┘
//!          │
//!          ▼
//!     ┌─────────┐
//!     │  Core   │ ◄── Queue + scheduler + in-flight cap
//!     └────┬────┘
//!          │
//!          ▼
//!     ┌─────────┐
//!     │ Buckets │ ◄── Request budget and cost budget
//!     └────┬────┘
//!          │
//!          ▼
//!     ┌─────────┐
//!     │ Metrics │ ◄── Snapshots and broadcast events
//!     └─────────┘
//! ```

mod bucket;
mod config;
mod core;
mod error;
mod manager;
mod metrics;
mod queue;
mod utils;

/// Token bucket primitive
pub use bucket::{TokenBucket, TOKEN_EPSILON};

/// Configuration types and the built-in preset table
pub use config::{
    AdmissionPolicy, RateLimiterConfig, API_PRESETS, DEFAULT_TICK_INTERVAL_MS, FALLBACK_PRESET,
};

/// Per-API limiter and the handle returned by `submit`
pub use core::{RateLimiter, Ticket, EVENT_CHANNEL_CAPACITY};

/// Error types and upstream rate-limit detection
pub use error::{mentions_rate_limit, ApiError, ExecuteError, LimiterError, RateLimitSignal};

/// Registry of limiters keyed by API name
pub use manager::{ManagerStats, RateLimiterManager};

/// Snapshots, events and health indicators
pub use metrics::{
    CapacitySnapshot, EventKind, HealthStatus, LimiterEvent, LimiterStats, LimiterStatus,
};

/// Request priorities and options
pub use queue::{Priority, RequestOptions};

/// Wall-clock helper used for event timestamps
pub use utils::current_time_ms;
