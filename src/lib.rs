//! # Tollgate - Per-API Admission Control for Outbound Calls
//!
//! An async rate limiter that sits between your code and the LLM APIs (or any
//! other metered upstream) it calls. Every call goes through a per-API
//! tollgate that waits until the request fits the provider's budget, then
//! lets it through. Think of it as a polite queue in front of each provider,
//! so you see fewer `429 Too Many Requests` and spend less effort retrying.
//!
//! ## What Does It Control?
//!
//! Each API identity (`"groq"`, `"openai"`, ...) gets its own limiter with
//! three independent limits:
//!
//! ```text
//!     Per-API Budget:
//!
//!     requests   [■■■■■]  burst 5, refills 30/min      ← one token per call
//!     cost units [■■■■■]  6 000, refills 6 000/min     ← e.g. LLM tokens
//!     in flight  [■■□]    at most 3 at once            ← concurrency cap
//! ```
//!
//! A call is admitted only when a request token is available, its estimated
//! cost fits the cost budget, and fewer than `max_concurrent` calls are
//! running. Until then it waits in a priority queue.
//!
//! ## Features
//!
//! - ⏳ **Queue, Don't Reject** - Calls wait for budget instead of failing
//! - 🎯 **Priorities** - High, normal and low, FIFO within each level
//! - 💰 **Cost Budgets** - Weight calls by estimated tokens, not just count
//! - 🚦 **Concurrency Caps** - Bound in-flight calls per provider
//! - 🔍 **429 Detection** - Upstream pushback shows up in the statistics
//! - 📡 **Live Events** - Subscribe to per-tick status and statistics
//!
//! ## Quick Start
//!
//! ### Through the Manager
//!
//! ```rust
//! use tollgate::{ApiError, Priority, RateLimiterManager, RequestOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RateLimiterManager::new();
//!
//! let reply = manager
//!     .execute(
//!         "anthropic",
//!         || async {
//!             // Your HTTP call goes here
//!             Ok::<_, ApiError>("Bonjour")
//!         },
//!         RequestOptions::new()
//!             .with_priority(Priority::High)
//!             .with_estimated_cost(2_000.0)
//!             .with_metadata("translate greeting"),
//!     )
//!     .await?;
//!
//! assert_eq!(reply, "Bonjour");
//! println!("{}", manager.get_stats("anthropic").unwrap_or_default());
//! manager.stop_all();
//! # Ok(())
//! # }
//! ```
//!
//! ### Standalone Limiter with the Builder
//!
//! ```rust
//! use tollgate::{AdmissionPolicy, ApiError, RateLimiterBuilder, RequestOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiterBuilder::new()
//!     .api("internal-llm")
//!     .requests_per_minute(120)      // Sustained call rate
//!     .cost_units_per_minute(50_000) // Sustained token rate
//!     .burst_size(10)                // Back-to-back calls
//!     .max_concurrent(4)             // In-flight cap
//!     .admission_policy(AdmissionPolicy::SkipBlocked)
//!     .start()?;
//!
//! let ticket = limiter.submit(|| async { Ok::<_, ApiError>(1) }, RequestOptions::low())?;
//! assert_eq!(ticket.await?, 1);
//! limiter.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼───────────────┐
//!                    │   RateLimiterManager     │
//!                    ├──────────────────────────┤
//!                    │  • execute(api, work)    │
//!                    │  • get_status / stats    │
//!                    │  • subscribe()           │
//!                    └──────────┬───────────────┘
//!                               │ one per API
//!                ┌──────────────┴───────────────┐
//!                │                               │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   RateLimiter       │       │   Scheduler task     │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • Priority queue    │ ◄──── │ • Ticks every 100ms  │
//!     │ • Two token buckets │       │ • Refills buckets    │
//!     │ • In-flight cap     │       │ • Admits what fits   │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Built-in Presets
//!
//! | API          | req/min | cost units/min | burst | max concurrent |
//! |--------------|---------|----------------|-------|----------------|
//! | `groq`       | 30      | 6 000          | 5     | 3              |
//! | `openai`     | 60      | 90 000         | 10    | 5              |
//! | `anthropic`  | 50      | 40 000         | 5     | 3              |
//! | `gemini`     | 15      | 32 000         | 3     | 2              |
//! | `openrouter` | 20      | 50 000         | 5     | 3              |
//! | anything else| 20      | 20 000         | 3     | 2              |
//!
//! ## Runtime
//!
//! Limiters run on tokio. Creating one outside a runtime fails with
//! [`LimiterError::NoRuntime`]. The crate never installs a `tracing`
//! subscriber; wire up your own to see its logs.
//!
//! ## Examples
//!
//! See the `demos/` directory for complete examples:
//! - `basic.rs` - Priorities, cost budgets and statistics
//! - `monitor.rs` - Watching live events from several providers

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod rate_limiter;

// Public re-exports
pub use rate_limiter::{
    current_time_ms, mentions_rate_limit, AdmissionPolicy, ApiError, CapacitySnapshot, EventKind,
    ExecuteError, HealthStatus, LimiterError, LimiterEvent, LimiterStats, LimiterStatus,
    ManagerStats, Priority, RateLimitSignal, RateLimiter, RateLimiterConfig, RateLimiterManager,
    RequestOptions, Ticket, TokenBucket, API_PRESETS, DEFAULT_TICK_INTERVAL_MS,
    EVENT_CHANNEL_CAPACITY, FALLBACK_PRESET, TOKEN_EPSILON,
};

/// A rate limiter manager wrapped in `Arc` for sharing across tasks.
///
/// The manager is already cheap to clone; this alias is for code that
/// prefers to pass `Arc`s around explicitly.
///
/// # Example
/// ```rust
/// use tollgate::{RateLimiterManager, SharedManager};
/// use std::sync::Arc;
///
/// let shared: SharedManager = Arc::new(RateLimiterManager::new());
/// let for_worker = Arc::clone(&shared);
/// assert!(for_worker.is_empty());
/// ```
pub type SharedManager = std::sync::Arc<RateLimiterManager>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// Import everything you need with a single line:
/// ```rust
/// use tollgate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical rate limiting use cases.
    //!
    //! # Example
    //! ```rust
    //! use tollgate::prelude::*;
    //!
    //! let manager = RateLimiterManager::new();
    //! let options = RequestOptions::new().with_priority(Priority::High);
    //! let config = RateLimiterConfig::for_api("groq");
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        AdmissionPolicy, ApiError, ExecuteError, HealthStatus, LimiterError, LimiterStats,
        LimiterStatus, Priority, RateLimitSignal, RateLimiter, RateLimiterBuilder,
        RateLimiterConfig, RateLimiterManager, RequestOptions, SharedManager,
    };
}

/// Builder for limiter configurations and standalone limiters.
///
/// Starts from the fallback budget, or from a preset once
/// [`RateLimiterBuilder::api`] names a known provider. Explicit setters
/// always win over the preset.
///
/// # Example
///
/// ```rust
/// use tollgate::RateLimiterBuilder;
///
/// // Groq's preset with a tighter in-flight cap
/// let config = RateLimiterBuilder::new()
///     .api("groq")
///     .max_concurrent(1)
///     .build_config()
///     .unwrap();
/// assert_eq!(config.requests_per_minute, 30);
/// assert_eq!(config.max_concurrent, 1);
///
/// // Invalid settings are rejected
/// let result = RateLimiterBuilder::new().burst_size(0).build_config();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiterBuilder {
    api: String,
    config: RateLimiterConfig,
}

impl RateLimiterBuilder {
    /// Creates a new builder with the fallback configuration.
    ///
    /// Default configuration:
    /// - 20 requests per minute, burst 3
    /// - 20 000 cost units per minute
    /// - 2 concurrent calls
    /// - 100ms tick, strict admission
    pub fn new() -> Self {
        Self {
            api: "default".to_string(),
            config: RateLimiterConfig::default(),
        }
    }

    /// Sets the API identity and loads its preset, if one exists.
    ///
    /// Call this before the other setters; it replaces the budget.
    pub fn api(mut self, api: impl Into<String>) -> Self {
        self.api = api.into();
        self.config = RateLimiterConfig::for_api(&self.api)
            .with_tick_interval_ms(self.config.tick_interval_ms)
            .with_admission_policy(self.config.admission);
        self
    }

    /// Sets the sustained request rate.
    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.config.requests_per_minute = rpm;
        self
    }

    /// Sets the sustained cost rate, which is also the cost bucket capacity.
    pub fn cost_units_per_minute(mut self, units: u64) -> Self {
        self.config.cost_units_per_minute = units;
        self
    }

    /// Sets how many calls may fire back-to-back.
    pub fn burst_size(mut self, burst: u32) -> Self {
        self.config.burst_size = burst;
        self
    }

    /// Sets the in-flight cap.
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    /// Sets the scheduler period in milliseconds.
    pub fn tick_interval_ms(mut self, ms: u64) -> Self {
        self.config.tick_interval_ms = ms;
        self
    }

    /// Sets how a blocked queue head is treated.
    pub fn admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.config.admission = policy;
        self
    }

    /// Returns the validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] if any setting is zero.
    pub fn build_config(self) -> Result<RateLimiterConfig, LimiterError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Starts a standalone limiter with the configured settings.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::InvalidConfig`] if any setting is zero
    /// - [`LimiterError::NoRuntime`] outside a tokio runtime
    pub fn start(self) -> Result<std::sync::Arc<RateLimiter>, LimiterError> {
        RateLimiter::start(self.api, self.config)
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_builder_defaults_to_fallback() {
        let config = RateLimiterBuilder::new().build_config().unwrap();
        assert_eq!(config, RateLimiterConfig::fallback());
    }

    #[test]
    fn test_builder_loads_preset() {
        let config = RateLimiterBuilder::new()
            .tick_interval_ms(50)
            .api("OpenAI")
            .build_config()
            .unwrap();

        assert_eq!(config.requests_per_minute, 60);
        assert_eq!(config.cost_units_per_minute, 90_000);
        assert_eq!(config.tick_interval_ms, 50);
    }

    #[test]
    fn test_builder_chain() {
        let config = RateLimiterBuilder::new()
            .requests_per_minute(600)
            .cost_units_per_minute(1_000)
            .burst_size(20)
            .max_concurrent(8)
            .tick_interval_ms(25)
            .admission_policy(AdmissionPolicy::SkipBlocked)
            .build_config()
            .unwrap();

        assert_eq!(config.requests_per_minute, 600);
        assert_eq!(config.cost_units_per_minute, 1_000);
        assert_eq!(config.burst_size, 20);
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.tick_interval_ms, 25);
        assert_eq!(config.admission, AdmissionPolicy::SkipBlocked);
    }

    #[test]
    fn test_builder_validation() {
        let result = RateLimiterBuilder::new().max_concurrent(0).build_config();
        assert!(matches!(result, Err(LimiterError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_builder_start() {
        let limiter = RateLimiterBuilder::new().api("gemini").start().unwrap();
        assert_eq!(limiter.api(), "gemini");
        assert_eq!(limiter.config().burst_size, 3);
        limiter.stop();
    }

    #[test]
    fn test_builder_start_without_runtime() {
        let result = RateLimiterBuilder::default().start();
        assert!(matches!(result, Err(LimiterError::NoRuntime)));
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _manager = RateLimiterManager::new();
        let _config = RateLimiterConfig::default();
        let _priority = Priority::Low;
        let _status = HealthStatus::Healthy;
    }

    #[test]
    fn test_shared_types() {
        let shared: SharedManager = Arc::new(RateLimiterManager::new());
        let clone = Arc::clone(&shared);
        assert!(clone.is_empty());
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(API_PRESETS.len(), 5);
        assert_eq!(DEFAULT_TICK_INTERVAL_MS, 100);
    }
}
