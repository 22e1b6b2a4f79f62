//! Time source for the key registry's refresh throttle.
//!
//! The registry never reads ambient time directly; it asks a [`Clock`]
//! handed to it at construction. Production code uses [`SystemClock`];
//! tests substitute `testutil::ManualClock` to step time deterministically.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// [`Clock`] backed by the system UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
