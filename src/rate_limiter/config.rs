//! # Rate Limiter Configuration
//!
//! This module holds the per-API budget settings and the built-in preset
//! table. Think of it as the "settings panel" for each upstream API.
//!
//! ## Key Concepts
//!
//! ### Two Budgets per API
//!
//! ```text
//!     Per-API Configuration:
//!
//!     ┌───────────────────────────────────────┐
//!     │ Request bucket                        │
//!     │   capacity: burst_size                │ ← back-to-back calls
//!     │   refill:   requests_per_minute / 60  │ ← per second
//!     ├───────────────────────────────────────┤
//!     │ Cost bucket                           │
//!     │   capacity: cost_units_per_minute     │ ← e.g. LLM tokens
//!     │   refill:   cost_units_per_minute / 60│
//!     ├───────────────────────────────────────┤
//!     │ max_concurrent                        │ ← in-flight cap
//!     │ tick_interval_ms                      │ ← scheduler period
//!     └───────────────────────────────────────┘
//! ```
//!
//! ### Admission Policy
//!
//! ```text
//!     Strict ───────► blocked head stops the tick (default)
//!        │
//!     SkipBlocked ──► later items that fit may overtake a blocked head
//! ```

use super::error::LimiterError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default scheduler period in milliseconds.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Built-in budgets: `(api, requests/min, cost units/min, burst, max concurrent)`.
///
/// These literals are part of the public contract; changing them changes how
/// hard every caller hits the corresponding provider.
pub const API_PRESETS: [(&str, u32, u64, u32, usize); 5] = [
    ("groq", 30, 6_000, 5, 3),
    ("openai", 60, 90_000, 10, 5),
    ("anthropic", 50, 40_000, 5, 3),
    ("gemini", 15, 32_000, 3, 2),
    ("openrouter", 20, 50_000, 5, 3),
];

/// Budget used for API identities missing from [`API_PRESETS`]:
/// `(requests/min, cost units/min, burst, max concurrent)`.
pub const FALLBACK_PRESET: (u32, u64, u32, usize) = (20, 20_000, 3, 2);

/// How the scheduler treats a queue head that does not fit the budgets.
///
/// ## Example
///
/// ```rust
/// use tollgate::{AdmissionPolicy, RateLimiterConfig};
///
/// let config = RateLimiterConfig::for_api("openai")
///     .with_admission_policy(AdmissionPolicy::SkipBlocked);
/// assert_eq!(config.admission, AdmissionPolicy::SkipBlocked);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Head-of-line blocking: if the highest-priority item cannot be
    /// admitted, nothing else is admitted this tick.
    ///
    /// Expensive requests can never be starved by a stream of cheap ones.
    #[default]
    Strict,

    /// Admit the first item, in queue order, that fits both budgets.
    ///
    /// Better utilization; an expensive head may wait longer.
    SkipBlocked,
}

/// Configuration for a single API's rate limiter.
///
/// ## Examples
///
/// ```rust
/// use tollgate::RateLimiterConfig;
///
/// // Built-in preset
/// let openai = RateLimiterConfig::for_api("openai");
/// assert_eq!(openai.requests_per_minute, 60);
///
/// // Unknown identities get the fallback budget
/// let other = RateLimiterConfig::for_api("my-internal-api");
/// assert_eq!(other, RateLimiterConfig::fallback());
///
/// // Custom budget
/// let config = RateLimiterConfig::new(
///     120,     // requests per minute
///     100_000, // cost units per minute
///     10,      // burst size
///     4,       // max concurrent
/// );
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Sustained request rate.
    pub requests_per_minute: u32,

    /// Sustained cost rate; also the capacity of the cost bucket.
    pub cost_units_per_minute: u64,

    /// Capacity of the request bucket: how many calls may fire back-to-back.
    pub burst_size: u32,

    /// Maximum number of calls in flight at once.
    pub max_concurrent: usize,

    /// Scheduler period in milliseconds.
    pub tick_interval_ms: u64,

    /// Treatment of a queue head that does not fit the budgets.
    pub admission: AdmissionPolicy,
}

impl Default for RateLimiterConfig {
    /// Same as [`RateLimiterConfig::fallback`].
    fn default() -> Self {
        Self::fallback()
    }
}

impl RateLimiterConfig {
    /// Creates a configuration with the default tick interval and policy.
    pub fn new(
        requests_per_minute: u32,
        cost_units_per_minute: u64,
        burst_size: u32,
        max_concurrent: usize,
    ) -> Self {
        Self {
            requests_per_minute,
            cost_units_per_minute,
            burst_size,
            max_concurrent,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            admission: AdmissionPolicy::Strict,
        }
    }

    /// Returns the built-in preset for `api`, if there is one.
    ///
    /// Lookup ignores case and surrounding whitespace.
    pub fn preset(api: &str) -> Option<Self> {
        let key = normalize_api(api);
        API_PRESETS
            .iter()
            .find(|(name, ..)| *name == key)
            .map(|&(_, rpm, cost, burst, concurrent)| Self::new(rpm, cost, burst, concurrent))
    }

    /// The budget used for unrecognized API identities.
    pub fn fallback() -> Self {
        let (rpm, cost, burst, concurrent) = FALLBACK_PRESET;
        Self::new(rpm, cost, burst, concurrent)
    }

    /// Returns the preset for `api`, or the fallback budget.
    pub fn for_api(api: &str) -> Self {
        Self::preset(api).unwrap_or_else(Self::fallback)
    }

    /// Sets the scheduler period.
    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    /// Sets the admission policy.
    pub fn with_admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.admission = policy;
        self
    }

    /// Sets the request bucket capacity.
    pub fn with_burst_size(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    /// Sets the in-flight cap.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterError::InvalidConfig`] if any rate, capacity, cap or
    /// the tick interval is zero.
    ///
    /// ```rust
    /// use tollgate::RateLimiterConfig;
    ///
    /// let config = RateLimiterConfig::new(0, 1000, 5, 2);
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), LimiterError> {
        if self.requests_per_minute == 0 {
            return Err(LimiterError::InvalidConfig(
                "requests_per_minute must be greater than 0",
            ));
        }
        if self.cost_units_per_minute == 0 {
            return Err(LimiterError::InvalidConfig(
                "cost_units_per_minute must be greater than 0",
            ));
        }
        if self.burst_size == 0 {
            return Err(LimiterError::InvalidConfig("burst_size must be greater than 0"));
        }
        if self.max_concurrent == 0 {
            return Err(LimiterError::InvalidConfig(
                "max_concurrent must be greater than 0",
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(LimiterError::InvalidConfig(
                "tick_interval_ms must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Request bucket refill rate.
    pub fn requests_per_second(&self) -> f64 {
        self.requests_per_minute as f64 / 60.0
    }

    /// Cost bucket refill rate.
    pub fn cost_units_per_second(&self) -> f64 {
        self.cost_units_per_minute as f64 / 60.0
    }

    /// Scheduler period as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Canonical form of an API identity: trimmed and lowercased.
pub(crate) fn normalize_api(api: &str) -> String {
    api.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_match_table() {
        let groq = RateLimiterConfig::preset("groq").unwrap();
        assert_eq!(groq.requests_per_minute, 30);
        assert_eq!(groq.cost_units_per_minute, 6_000);
        assert_eq!(groq.burst_size, 5);
        assert_eq!(groq.max_concurrent, 3);

        let openai = RateLimiterConfig::preset("openai").unwrap();
        assert_eq!(
            (
                openai.requests_per_minute,
                openai.cost_units_per_minute,
                openai.burst_size,
                openai.max_concurrent
            ),
            (60, 90_000, 10, 5)
        );

        let gemini = RateLimiterConfig::preset("gemini").unwrap();
        assert_eq!(gemini.requests_per_minute, 15);
        assert_eq!(gemini.max_concurrent, 2);

        for (name, ..) in API_PRESETS {
            let config = RateLimiterConfig::preset(name).unwrap();
            assert!(config.validate().is_ok(), "preset {} is invalid", name);
            assert_eq!(config.tick_interval_ms, DEFAULT_TICK_INTERVAL_MS);
        }
    }

    #[test]
    fn test_presets_are_distinct() {
        for (i, a) in API_PRESETS.iter().enumerate() {
            for b in API_PRESETS.iter().skip(i + 1) {
                assert_ne!((a.1, a.2, a.3, a.4), (b.1, b.2, b.3, b.4));
            }
        }
    }

    #[test]
    fn test_preset_lookup_is_case_insensitive() {
        assert_eq!(
            RateLimiterConfig::preset("  Anthropic "),
            RateLimiterConfig::preset("anthropic")
        );
        assert!(RateLimiterConfig::preset("unknown").is_none());
    }

    #[test]
    fn test_fallback() {
        let config = RateLimiterConfig::for_api("something-else");
        assert_eq!(config, RateLimiterConfig::fallback());
        assert_eq!(config, RateLimiterConfig::default());
        assert_eq!(config.requests_per_minute, 20);
        assert_eq!(config.cost_units_per_minute, 20_000);
        assert_eq!(config.burst_size, 3);
        assert_eq!(config.max_concurrent, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimiterConfig::default().validate().is_ok());

        let cases = [
            RateLimiterConfig::new(0, 100, 1, 1),
            RateLimiterConfig::new(10, 0, 1, 1),
            RateLimiterConfig::new(10, 100, 0, 1),
            RateLimiterConfig::new(10, 100, 1, 0),
            RateLimiterConfig::new(10, 100, 1, 1).with_tick_interval_ms(0),
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(LimiterError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_derived_rates() {
        let config = RateLimiterConfig::new(30, 6_000, 5, 3);
        assert_eq!(config.requests_per_second(), 0.5);
        assert_eq!(config.cost_units_per_second(), 100.0);
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_builders() {
        let config = RateLimiterConfig::for_api("openai")
            .with_burst_size(2)
            .with_max_concurrent(1)
            .with_tick_interval_ms(250)
            .with_admission_policy(AdmissionPolicy::SkipBlocked);

        assert_eq!(config.burst_size, 2);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.admission, AdmissionPolicy::SkipBlocked);
        assert_eq!(config.requests_per_minute, 60);
    }

    #[test]
    fn test_deserialize_partial_override() {
        let config: RateLimiterConfig = serde_json::from_str(
            r#"{ "requests_per_minute": 5, "max_concurrent": 1, "admission": "skip_blocked" }"#,
        )
        .unwrap();

        assert_eq!(config.requests_per_minute, 5);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.admission, AdmissionPolicy::SkipBlocked);
        // Missing fields come from the fallback preset
        assert_eq!(config.burst_size, FALLBACK_PRESET.2);
    }

    #[test]
    fn test_normalize_api() {
        assert_eq!(normalize_api(" OpenAI\n"), "openai");
    }
}
