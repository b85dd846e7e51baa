//! # Utility Functions (utils.rs)
//!
//! Time helpers shared by the limiter and its snapshots.
//!
//! Two clocks are in play:
//!
//! ```text
//!     tokio::time::Instant ──► bucket refill, queue wait   (monotonic, pausable in tests)
//!     current_time_ms()    ──► event timestamps            (wall clock, for UIs)
//! ```

use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// Wall-clock epoch captured once, advanced with a monotonic Instant so a
// system clock jump never makes event timestamps run backwards.
static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

/// Returns the current time in milliseconds since UNIX epoch.
///
/// ```rust
/// use tollgate::current_time_ms;
///
/// let now = current_time_ms();
/// assert!(now > 0);
/// ```
#[inline]
pub fn current_time_ms() -> u64 {
    let (start, base_ms) = START_TIME_BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    });
    base_ms.saturating_add(start.elapsed().as_millis() as u64)
}

/// Whole milliseconds in `duration`, rounded up.
///
/// A 0.2ms wait is still a wait; rounding down would report it as none.
#[inline]
pub(crate) fn ceil_millis(duration: Duration) -> u64 {
    if duration == Duration::MAX {
        return u64::MAX;
    }
    let nanos = duration.as_nanos();
    let millis = nanos.div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Whole milliseconds in `duration`, rounded down and saturating.
#[inline]
pub(crate) fn floor_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
