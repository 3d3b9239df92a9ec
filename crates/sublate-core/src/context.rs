//! Injectable clock (spec.md §9, "ambient mutable state → explicit config").
//!
//! `CoreContext` itself — the `{cache, providers, clock, logger}` bundle
//! threaded through every orchestrator operation — lives in
//! `sublate-orchestrator`, since it necessarily depends on the cache and
//! provider-registry types defined in their own crates. This module
//! supplies the one piece that belongs at the bottom of the dependency
//! graph: the `Clock` abstraction every other crate can depend on without
//! pulling in cache/provider machinery.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Source of wall-clock time and monotonic instants, injected so tests can
/// control elapsed-time-dependent behavior (TTL expiry, backoff, deadlines)
/// without real sleeps.
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;
    /// Current monotonic instant, for deadline/backoff arithmetic.
    fn monotonic_now(&self) -> Instant;
}

/// Real clock backed by `chrono::Utc::now()` / `std::time::Instant::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock whose wall-clock reading can be advanced explicitly by tests.
/// `monotonic_now` still uses the real `Instant::now()` since `Instant`
/// cannot be constructed at an arbitrary point — tests that need to control
/// monotonic elapsed time should inject short real sleeps or restructure
/// the code under test to compare `DateTime<Utc>` values instead.
#[derive(Debug)]
pub struct FakeClock {
    millis_since_epoch: AtomicI64,
}

impl FakeClock {
    /// Start the fake clock at the given wall-clock time.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis_since_epoch: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Advance the wall-clock reading by `duration`.
    pub fn advance(&self, duration: chrono::Duration) {
        self.millis_since_epoch
            .fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let millis = self.millis_since_epoch.load(Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).expect("fake clock millis always in range")
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }
}
