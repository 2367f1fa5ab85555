//! Time sources for the limiter.
//!
//! The limiter core never reads the system clock itself: callers pass `now`
//! into [`Limiter::admit`](crate::ratelimit::Limiter::admit). The HTTP layer
//! obtains that instant from a [`Clock`], which tests replace with a
//! [`MockClock`].

use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// System clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying instant, so advancing one clone is
/// visible through all of them.
///
/// ```
/// use quota_gate::clock::{Clock, MockClock};
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
/// clock.advance(Duration::from_secs(2));
/// assert_eq!(clock.now(), start + Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    pub fn new(start: Instant) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: Instant) {
        *self.current.lock() = instant;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}
