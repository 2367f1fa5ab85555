//! Sliding-window log.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::backend::Decision;
use super::limiter::WindowState;
use super::policy::{Algorithm, QuotaPolicy};

/// Per-identity log of admitted request instants, oldest first.
///
/// Only admissions are logged, so no half-open interval of one period ever
/// holds more than `limit` of them.
#[derive(Debug, Clone, Default)]
pub struct SlidingWindowLog {
    admitted: VecDeque<Instant>,
}

impl SlidingWindowLog {
    /// Number of logged admissions, including any not yet pruned.
    pub fn logged(&self) -> usize {
        self.admitted.len()
    }

    fn prune(&mut self, period: Duration, now: Instant) {
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) < period {
                break;
            }
            self.admitted.pop_front();
        }
    }

    fn live(&self, period: Duration, now: Instant) -> impl Iterator<Item = &Instant> {
        self.admitted
            .iter()
            .filter(move |&&at| now.saturating_duration_since(at) < period)
    }
}

impl WindowState for SlidingWindowLog {
    const ALGORITHM: Algorithm = Algorithm::SlidingWindowLog;

    fn new(policy: &QuotaPolicy, _now: Instant) -> Self {
        Self {
            admitted: VecDeque::with_capacity(policy.limit().min(64) as usize),
        }
    }

    fn is_consistent(&self, policy: &QuotaPolicy) -> bool {
        self.admitted.len() as u64 <= policy.limit()
    }

    fn try_admit(&mut self, policy: &QuotaPolicy, now: Instant) -> Decision {
        self.prune(policy.period(), now);

        let logged = self.admitted.len() as u64;
        if logged < policy.limit() {
            // Keep the log ordered when racing callers sampled `now` out of order.
            let at = self.admitted.back().map_or(now, |&last| last.max(now));
            self.admitted.push_back(at);
            return Decision::admit(policy.limit() - logged - 1);
        }

        let oldest = self.admitted.front().copied().unwrap_or(now);
        let retry_after = policy.period() - now.saturating_duration_since(oldest);
        Decision::reject(retry_after)
    }

    fn usage(&self, policy: &QuotaPolicy, now: Instant) -> (u64, Duration) {
        let mut live = self.live(policy.period(), now);
        match live.next() {
            Some(&oldest) => {
                let used = 1 + live.count() as u64;
                (used, policy.period() - now.saturating_duration_since(oldest))
            }
            None => (0, Duration::ZERO),
        }
    }
}
