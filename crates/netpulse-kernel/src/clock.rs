//! Wall-clock abstraction used by the scheduler and collection items.
//!
//! Injecting the clock rather than calling `SystemTime::now()` directly makes
//! every cadence and schedule decision deterministic in tests: a test can
//! instantiate a [`CollectionContext`](crate::context::CollectionContext)
//! with a manually-advanced clock and sweep simulated time across minute
//! boundaries without sleeping.

/// Provides the current wall-clock time as Unix-epoch seconds.
///
/// Second resolution is deliberate: polling cadence, schedule matching and
/// the minute-dedup rule all operate on whole seconds.
pub trait Clock: Send + Sync {
    /// Returns the current time as seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// The default [`Clock`] implementation backed by the system clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}
