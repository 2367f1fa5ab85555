//! Fixed-window counter.

use std::time::{Duration, Instant};

use super::backend::Decision;
use super::limiter::WindowState;
use super::policy::{Algorithm, QuotaPolicy};

/// Per-identity fixed-window state.
///
/// The window opens on the identity's first request and restarts on the
/// first request arriving a full period or more after it opened.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    /// Requests admitted in the current window
    count: u64,
    /// When the current window started
    window_start: Instant,
}

impl FixedWindow {
    /// Requests admitted in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Start of the current window.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    fn reset(&mut self, now: Instant) {
        self.count = 0;
        self.window_start = now;
    }
}

impl WindowState for FixedWindow {
    const ALGORITHM: Algorithm = Algorithm::FixedWindow;

    fn new(_policy: &QuotaPolicy, now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_consistent(&self, policy: &QuotaPolicy) -> bool {
        self.count <= policy.limit()
    }

    fn try_admit(&mut self, policy: &QuotaPolicy, now: Instant) -> Decision {
        if self.elapsed(now) >= policy.period() {
            self.reset(now);
        }

        if self.count < policy.limit() {
            self.count += 1;
            Decision::admit(policy.limit() - self.count)
        } else {
            Decision::reject(policy.period() - self.elapsed(now))
        }
    }

    fn usage(&self, policy: &QuotaPolicy, now: Instant) -> (u64, Duration) {
        let elapsed = self.elapsed(now);
        if elapsed >= policy.period() {
            (0, Duration::ZERO)
        } else {
            (self.count, policy.period() - elapsed)
        }
    }
}
