//! # Per-API Rate Limiter Manager
//!
//! This module provides the registry that maps API names to their
//! [`RateLimiter`]s. Application code talks to the manager; the manager
//! creates each limiter on first use and hands back the same one forever
//! after.
//!
//! ## Architecture
//!
//! ```text
//!     Outbound calls:
//!     execute("groq", ..)     ──┐
//!     execute("OpenAI", ..)   ──┤
//!     execute("openai ", ..)  ──┼──► Manager ──► Individual Rate Limiters
//!     execute("anthropic",..) ──┤        │
//!     execute("acme-llm", ..) ──┘        ▼
//!                              ┌────────────────────┐
//!                              │  DashMap           │
//!                              │  ┌──────────────┐  │
//!                              │  │ groq   → RL  │  │  RL = Rate Limiter
//!                              │  │ openai → RL  │  │
//!                              │  │ ...    → RL  │  │
//!                              │  └──────────────┘  │
//!                              └────────────────────┘
//!                                        │
//!                                        ▼
//!                              one broadcast channel
//!                              shared by every limiter
//! ```
//!
//! ## Configuration Resolution
//!
//! When a limiter is created its configuration comes from the first source
//! that has one:
//!
//! 1. The `custom` config passed to [`RateLimiterManager::get_limiter`]
//! 2. A manager-level override ([`RateLimiterManager::with_overrides`])
//! 3. The built-in preset table ([`API_PRESETS`](super::config::API_PRESETS))
//! 4. The fallback configuration
//!
//! Once created, a limiter keeps its configuration. Later calls that pass a
//! different `custom` config get the existing limiter unchanged.

use super::{
    config::{normalize_api, RateLimiterConfig},
    core::{RateLimiter, Ticket, EVENT_CHANNEL_CAPACITY},
    error::{ExecuteError, LimiterError, RateLimitSignal},
    metrics::{LimiterEvent, LimiterStats, LimiterStatus},
    queue::RequestOptions,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Registry of per-API rate limiters.
///
/// Cheap to clone; clones share the same registry.
///
/// ## Usage Patterns
///
/// ### Shared Across an Application
///
/// ```rust
/// use tollgate::{ApiError, RateLimiterManager, RequestOptions};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = RateLimiterManager::new();
///
/// let transcript = manager
///     .execute(
///         "groq",
///         || async { Ok::<_, ApiError>("hello world".to_string()) },
///         RequestOptions::new().with_estimated_cost(800.0),
///     )
///     .await?;
///
/// assert_eq!(transcript, "hello world");
/// manager.stop_all();
/// # Ok(())
/// # }
/// ```
///
/// ### With Overrides
///
/// ```rust
/// use std::collections::HashMap;
/// use tollgate::{RateLimiterConfig, RateLimiterManager};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), tollgate::LimiterError> {
/// let mut overrides = HashMap::new();
/// overrides.insert("openai".to_string(), RateLimiterConfig::new(500, 2_000_000, 50, 20));
///
/// let manager = RateLimiterManager::with_overrides(overrides);
/// let limiter = manager.get_limiter("OpenAI", None)?;
/// assert_eq!(limiter.config().requests_per_minute, 500);
/// manager.stop_all();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiterManager {
    /// Normalized API name to limiter.
    limiters: Arc<DashMap<String, Arc<RateLimiter>, ahash::RandomState>>,

    /// Normalized API name to configuration, consulted before the presets.
    overrides: Arc<HashMap<String, RateLimiterConfig>>,

    /// Channel handed to every limiter this manager creates.
    events: broadcast::Sender<LimiterEvent>,

    /// Total number of limiters created since startup.
    total_created: Arc<AtomicU64>,
}

impl RateLimiterManager {
    /// Creates an empty manager using the built-in presets.
    pub fn new() -> Self {
        Self::with_overrides(HashMap::new())
    }

    /// Creates a manager whose `overrides` take precedence over the presets.
    ///
    /// Override keys are matched case-insensitively, ignoring surrounding
    /// whitespace.
    pub fn with_overrides(overrides: HashMap<String, RateLimiterConfig>) -> Self {
        let overrides = overrides
            .into_iter()
            .map(|(api, config)| (normalize_api(&api), config))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            limiters: Arc::new(DashMap::with_hasher(ahash::RandomState::new())),
            overrides: Arc::new(overrides),
            events,
            total_created: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Gets or creates the limiter for `api`.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::InvalidConfig`] if `api` is blank or the resolved
    ///   configuration is invalid; nothing is registered in that case
    /// - [`LimiterError::NoRuntime`] if a limiter has to be created outside
    ///   a tokio runtime
    pub fn get_limiter(
        &self,
        api: &str,
        custom: Option<RateLimiterConfig>,
    ) -> Result<Arc<RateLimiter>, LimiterError> {
        let key = normalize_api(api);
        if key.is_empty() {
            return Err(LimiterError::InvalidConfig("api name must not be empty"));
        }

        // Fast path: limiter already exists
        if let Some(limiter) = self.limiters.get(&key) {
            return Ok(Arc::clone(limiter.value()));
        }

        match self.limiters.entry(key) {
            Entry::Occupied(occupied) => {
                // Another caller created it while we were checking
                Ok(Arc::clone(occupied.get()))
            }
            Entry::Vacant(vacant) => {
                let config = custom.unwrap_or_else(|| self.resolve_config(vacant.key()));
                let limiter = RateLimiter::start_with_events(
                    vacant.key().clone(),
                    config,
                    self.events.clone(),
                )?;
                vacant.insert(Arc::clone(&limiter));

                let total = self.total_created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "Registered rate limiter for API: {} (total: {})",
                    limiter.api(),
                    total
                );
                Ok(limiter)
            }
        }
    }

    /// Configuration a newly created limiter for `api` would get, absent a
    /// custom config.
    pub fn config_for(&self, api: &str) -> RateLimiterConfig {
        self.resolve_config(&normalize_api(api))
    }

    fn resolve_config(&self, key: &str) -> RateLimiterConfig {
        self.overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| RateLimiterConfig::for_api(key))
    }

    /// Runs `work` through the limiter for `api`, creating it if needed.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::execute`]; limiter creation failures surface as
    /// [`ExecuteError::Limiter`].
    pub async fn execute<F, Fut, T, E>(
        &self,
        api: &str,
        work: F,
        options: RequestOptions,
    ) -> Result<T, ExecuteError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: RateLimitSignal + Send + 'static,
    {
        self.get_limiter(api, None)?.submit(work, options)?.await
    }

    /// Queues `work` on the limiter for `api` without waiting for it.
    ///
    /// # Errors
    ///
    /// See [`RateLimiter::submit`] and [`RateLimiterManager::get_limiter`].
    pub fn submit<F, Fut, T, E>(
        &self,
        api: &str,
        work: F,
        options: RequestOptions,
    ) -> Result<Ticket<T, E>, LimiterError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: RateLimitSignal + Send + 'static,
    {
        self.get_limiter(api, None)?.submit(work, options)
    }

    /// Status of an existing limiter; `None` if `api` was never used.
    pub fn get_status(&self, api: &str) -> Option<LimiterStatus> {
        self.limiters
            .get(&normalize_api(api))
            .map(|limiter| limiter.status())
    }

    /// Statistics of an existing limiter; `None` if `api` was never used.
    pub fn get_stats(&self, api: &str) -> Option<LimiterStats> {
        self.limiters
            .get(&normalize_api(api))
            .map(|limiter| limiter.stats())
    }

    /// Status of every limiter, keyed by normalized API name.
    pub fn get_all_status(&self) -> HashMap<String, LimiterStatus> {
        self.limiters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    /// Statistics of every limiter, keyed by normalized API name.
    pub fn get_all_stats(&self) -> HashMap<String, LimiterStats> {
        self.limiters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }

    /// Zeroes the counters of every limiter.
    pub fn reset_all_stats(&self) {
        for entry in self.limiters.iter() {
            entry.value().reset_stats();
        }
    }

    /// Stops every limiter.
    ///
    /// Stopped limiters stay registered, so later calls for the same API
    /// fail with [`LimiterError::Stopped`] instead of silently starting a
    /// fresh limiter.
    pub fn stop_all(&self) {
        // Collect first so no shard lock is held while stopping
        let limiters: Vec<Arc<RateLimiter>> = self
            .limiters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for limiter in &limiters {
            limiter.stop();
        }
        info!("Stopped all {} rate limiters", limiters.len());
    }

    /// Receives events from every limiter this manager owns.
    pub fn subscribe(&self) -> broadcast::Receiver<LimiterEvent> {
        self.events.subscribe()
    }

    /// Number of registered limiters.
    #[inline]
    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    /// Returns `true` if no limiter has been created yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }

    /// Normalized names of every registered API, sorted.
    pub fn apis(&self) -> Vec<String> {
        let mut apis: Vec<String> = self
            .limiters
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        apis.sort();
        apis
    }

    /// Aggregate statistics over every limiter.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tollgate::RateLimiterManager;
    ///
    /// let manager = RateLimiterManager::new();
    /// let stats = manager.stats();
    /// println!("{}", stats.summary());
    /// assert_eq!(stats.limiters, 0);
    /// ```
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total_created: self.total_created.load(Ordering::Relaxed),
            ..ManagerStats::default()
        };

        for entry in self.limiters.iter() {
            let limiter = entry.value();
            let limiter_stats = limiter.stats();

            stats.limiters += 1;
            if limiter.is_stopped() {
                stats.stopped += 1;
            }
            stats.queued_requests += limiter_stats.queue_length;
            stats.active_requests += limiter_stats.active_requests;
            stats.total_requests += limiter_stats.total_requests;
            stats.successful_requests += limiter_stats.successful_requests;
            stats.failed_requests += limiter_stats.failed_requests;
            stats.rate_limited_requests += limiter_stats.rate_limited_requests;
        }

        stats
    }
}

impl Default for RateLimiterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RateLimiterManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiterManager")
            .field("apis", &self.apis())
            .field("overrides", &self.overrides.len())
            .field("total_created", &self.total_created.load(Ordering::Relaxed))
            .finish()
    }
}

/// Aggregate statistics for a [`RateLimiterManager`].
///
/// ## Metrics Explained
///
/// - **limiters**: registered limiters, stopped ones included
/// - **stopped**: limiters that no longer accept work
/// - **queued_requests / active_requests**: summed across limiters
/// - **total/successful/failed/rate_limited**: summed lifetime counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerStats {
    /// Number of registered limiters.
    pub limiters: usize,

    /// Number of stopped limiters.
    pub stopped: usize,

    /// Total number of limiters created since startup.
    pub total_created: u64,

    /// Requests waiting across all limiters.
    pub queued_requests: usize,

    /// Requests executing across all limiters.
    pub active_requests: usize,

    /// Requests submitted across all limiters.
    pub total_requests: u64,

    /// Requests whose work succeeded.
    pub successful_requests: u64,

    /// Requests whose work failed.
    pub failed_requests: u64,

    /// Failed requests the upstream rejected as rate limited.
    pub rate_limited_requests: u64,
}

impl ManagerStats {
    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Rate Limiter Manager Stats:\n\
             ├─ Limiters:\n\
             │  ├─ Registered: {}\n\
             │  ├─ Stopped: {}\n\
             │  └─ Created: {}\n\
             ├─ Load:\n\
             │  ├─ Queued: {}\n\
             │  └─ Active: {}\n\
             └─ Lifetime:\n\
                ├─ Total Requests: {}\n\
                ├─ Successful: {}\n\
                ├─ Failed: {}\n\
                └─ Rate Limited: {}",
            self.limiters,
            self.stopped,
            self.total_created,
            self.queued_requests,
            self.active_requests,
            self.total_requests,
            self.successful_requests,
            self.failed_requests,
            self.rate_limited_requests
        )
    }

    /// Returns `true` if any upstream has pushed back.
    pub fn has_rate_limited(&self) -> bool {
        self.rate_limited_requests > 0
    }
}

impl fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
