//! Core rate limiter implementation.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

use super::backend::{Decision, Limiter, LimiterStats, WindowSnapshot};
use super::bucket::TokenBucket;
use super::counter::FixedWindow;
use super::identity::Identity;
use super::policy::{Algorithm, QuotaPolicy};
use super::sliding::SlidingWindowLog;

/// Per-identity state of one admission algorithm.
pub trait WindowState: Send + Sync + 'static {
    /// Algorithm this state implements.
    const ALGORITHM: Algorithm;

    /// Fresh state for an identity first seen at `now`.
    fn new(policy: &QuotaPolicy, now: Instant) -> Self;

    /// Whether the state satisfies its own invariants.
    fn is_consistent(&self, policy: &QuotaPolicy) -> bool;

    /// Check-and-update for one request.
    fn try_admit(&mut self, policy: &QuotaPolicy, now: Instant) -> Decision;

    /// Quota used and time until quota is regained, without mutating.
    fn usage(&self, policy: &QuotaPolicy, now: Instant) -> (u64, Duration);
}

struct WindowEntry<S> {
    state: S,
    last_seen: Instant,
}

/// A limiter keyed by identity, generic over the admission algorithm.
///
/// Windows live in a sharded map. The check-and-update for an identity runs
/// while holding its shard's write guard, so concurrent requests from the
/// same identity are serialized and identities on other shards never wait.
pub struct KeyedLimiter<S: WindowState> {
    policy: QuotaPolicy,
    windows: DashMap<Identity, WindowEntry<S>>,
}

/// Fixed-window counter limiter.
pub type FixedWindowLimiter = KeyedLimiter<FixedWindow>;
/// Sliding-window log limiter.
pub type SlidingWindowLogLimiter = KeyedLimiter<SlidingWindowLog>;
/// Token bucket limiter.
pub type TokenBucketLimiter = KeyedLimiter<TokenBucket>;

impl<S: WindowState> KeyedLimiter<S> {
    /// Create a new limiter enforcing `policy`.
    pub fn new(policy: QuotaPolicy) -> Self {
        Self {
            policy,
            windows: DashMap::new(),
        }
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    fn decide(&self, identity: &Identity, entry: &mut WindowEntry<S>, now: Instant) -> Decision {
        if !entry.state.is_consistent(&self.policy) {
            error!(
                identity = %identity,
                algorithm = %S::ALGORITHM,
                "Rate window invariant violated, resetting window"
            );
            entry.state = S::new(&self.policy, now);
        }

        if now > entry.last_seen {
            entry.last_seen = now;
        }

        let decision = entry.state.try_admit(&self.policy, now);
        if decision.admitted {
            trace!(identity = %identity, remaining = decision.remaining, "Request admitted");
        } else {
            debug!(
                identity = %identity,
                retry_after_ms = decision.retry_after.unwrap_or_default().as_millis() as u64,
                "Rate limit exceeded"
            );
        }
        decision
    }
}

impl<S: WindowState> Limiter for KeyedLimiter<S> {
    fn admit(&self, identity: &Identity, now: Instant) -> Decision {
        if let Some(mut entry) = self.windows.get_mut(identity) {
            return self.decide(identity, &mut entry, now);
        }

        let mut entry = self.windows.entry(identity.clone()).or_insert_with(|| {
            debug!(
                identity = %identity,
                limit = self.policy.limit(),
                period_ms = self.policy.period().as_millis() as u64,
                "Creating new rate window"
            );
            WindowEntry {
                state: S::new(&self.policy, now),
                last_seen: now,
            }
        });
        self.decide(identity, &mut entry, now)
    }

    fn unregister(&self, identity: &Identity) -> bool {
        let removed = self.windows.remove(identity).is_some();
        if removed {
            debug!(identity = %identity, "Unregistered rate window");
        }
        removed
    }

    fn evict_idle(&self, now: Instant, idle_ttl: Duration) -> usize {
        let mut evicted = 0;
        self.windows.retain(|_, entry| {
            // A window still holding admissions inside its period is never
            // dropped, whatever the ttl: a fresh window would grant the quota
            // again.
            let (used, reset_after) = entry.state.usage(&self.policy, now);
            let live = used > 0 || !reset_after.is_zero();
            let keep = live || now.saturating_duration_since(entry.last_seen) < idle_ttl;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn stats(&self, now: Instant) -> LimiterStats {
        let mut identities: Vec<WindowSnapshot> = self
            .windows
            .iter()
            .map(|item| {
                let (used, reset_after) = item.value().state.usage(&self.policy, now);
                WindowSnapshot {
                    identity: item.key().clone(),
                    used,
                    remaining: self.policy.limit().saturating_sub(used),
                    reset_after_ms: reset_after.as_millis() as u64,
                }
            })
            .collect();
        identities.sort_by(|a, b| a.identity.cmp(&b.identity));

        LimiterStats {
            algorithm: S::ALGORITHM,
            limit: Some(self.policy.limit()),
            period_ms: Some(self.policy.period().as_millis() as u64),
            identities,
        }
    }

    fn algorithm(&self) -> Algorithm {
        S::ALGORITHM
    }

    fn limit(&self) -> Option<u64> {
        Some(self.policy.limit())
    }
}

/// Limiter that admits every request and tracks nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnlimitedLimiter;

impl Limiter for UnlimitedLimiter {
    fn admit(&self, _identity: &Identity, _now: Instant) -> Decision {
        Decision::admit(u64::MAX)
    }

    fn unregister(&self, _identity: &Identity) -> bool {
        false
    }

    fn evict_idle(&self, _now: Instant, _idle_ttl: Duration) -> usize {
        0
    }

    fn len(&self) -> usize {
        0
    }

    fn stats(&self, _now: Instant) -> LimiterStats {
        LimiterStats {
            algorithm: Algorithm::Unlimited,
            limit: None,
            period_ms: None,
            identities: Vec::new(),
        }
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Unlimited
    }

    fn limit(&self) -> Option<u64> {
        None
    }
}

/// Build the limiter for `algorithm` enforcing `policy`.
pub fn build_limiter(algorithm: Algorithm, policy: QuotaPolicy) -> Arc<dyn Limiter> {
    match algorithm {
        Algorithm::FixedWindow => Arc::new(FixedWindowLimiter::new(policy)),
        Algorithm::SlidingWindowLog => Arc::new(SlidingWindowLogLimiter::new(policy)),
        Algorithm::TokenBucket => Arc::new(TokenBucketLimiter::new(policy)),
        Algorithm::Unlimited => Arc::new(UnlimitedLimiter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Barrier;

    const BOUNDED: [Algorithm; 3] = [
        Algorithm::FixedWindow,
        Algorithm::SlidingWindowLog,
        Algorithm::TokenBucket,
    ];

    fn policy(limit: u64, period_ms: u64) -> QuotaPolicy {
        QuotaPolicy::new(limit, Duration::from_millis(period_ms)).unwrap()
    }

    #[test]
    fn test_limiter_creation() {
        let limiter = FixedWindowLimiter::new(policy(5, 1000));
        assert_eq!(limiter.len(), 0);
        assert!(limiter.is_empty());
        assert_eq!(limiter.limit(), Some(5));
    }

    #[test]
    fn test_admit_creates_window() {
        let limiter = FixedWindowLimiter::new(policy(5, 1000));
        let decision = limiter.admit(&Identity::from("user_#_1"), Instant::now());

        assert!(decision.admitted);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn test_sixth_request_rejected_for_every_algorithm() {
        for algorithm in BOUNDED {
            let limiter = build_limiter(algorithm, policy(5, 1000));
            let user = Identity::from("user_#_1");
            let now = Instant::now();

            for i in 0..5 {
                assert!(limiter.admit(&user, now).admitted, "{algorithm}: request {i}");
            }
            let decision = limiter.admit(&user, now);
            assert!(!decision.admitted, "{algorithm}: 6th request admitted");
            assert!(decision.retry_after.unwrap() > Duration::ZERO);
        }
    }

    #[test]
    fn test_quota_regained_after_period() {
        for algorithm in BOUNDED {
            let limiter = build_limiter(algorithm, policy(2, 1000));
            let user = Identity::from("user_#_1");
            let start = Instant::now();

            limiter.admit(&user, start);
            limiter.admit(&user, start);
            assert!(!limiter.admit(&user, start).admitted);

            let later = start + Duration::from_millis(1000);
            assert!(limiter.admit(&user, later).admitted, "{algorithm}");
        }
    }

    #[test]
    fn test_identities_have_separate_quotas() {
        for algorithm in BOUNDED {
            let limiter = build_limiter(algorithm, policy(3, 1000));
            let alice = Identity::from("alice");
            let bob = Identity::from("bob");
            let now = Instant::now();

            for _ in 0..3 {
                limiter.admit(&alice, now);
            }
            assert!(!limiter.admit(&alice, now).admitted);

            for _ in 0..3 {
                assert!(limiter.admit(&bob, now).admitted, "{algorithm}");
            }
            assert_eq!(limiter.len(), 2);
        }
    }

    #[test]
    fn test_admissions_never_exceed_limit_within_period() {
        let limiter = SlidingWindowLogLimiter::new(policy(4, 1000));
        let user = Identity::from("user");
        let start = Instant::now();

        let admitted: Vec<u64> = (0..100u64)
            .map(|i| i * 37)
            .filter(|&ms| limiter.admit(&user, start + Duration::from_millis(ms)).admitted)
            .collect();

        for &from in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&ms| ms >= from && ms < from + 1000)
                .count();
            assert!(in_window <= 4, "{in_window} admissions in window starting at {from}ms");
        }
    }

    #[test]
    fn test_concurrent_admissions_are_exact() {
        const THREADS: usize = 32;
        const LIMIT: u64 = 10;

        for algorithm in BOUNDED {
            let limiter = build_limiter(algorithm, policy(LIMIT, 60_000));
            let user = Identity::from("hot_user");
            let now = Instant::now();
            let barrier = Barrier::new(THREADS);
            let admitted = AtomicU64::new(0);
            let rejected = AtomicU64::new(0);

            std::thread::scope(|scope| {
                for _ in 0..THREADS {
                    scope.spawn(|| {
                        barrier.wait();
                        if limiter.admit(&user, now).admitted {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        } else {
                            rejected.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });

            assert_eq!(admitted.load(Ordering::SeqCst), LIMIT, "{algorithm}");
            assert_eq!(rejected.load(Ordering::SeqCst), THREADS as u64 - LIMIT, "{algorithm}");
        }
    }

    #[test]
    fn test_unregister_restores_quota() {
        let limiter = FixedWindowLimiter::new(policy(1, 1000));
        let user = Identity::from("user");
        let now = Instant::now();

        assert!(limiter.admit(&user, now).admitted);
        assert!(!limiter.admit(&user, now).admitted);

        assert!(limiter.unregister(&user));
        assert!(!limiter.unregister(&user));
        assert!(limiter.admit(&user, now).admitted);
    }

    #[test]
    fn test_evict_idle_drops_only_stale_entries() {
        let limiter = TokenBucketLimiter::new(policy(5, 1000));
        let start = Instant::now();

        limiter.admit(&Identity::from("stale"), start);
        limiter.admit(&Identity::from("fresh"), start + Duration::from_secs(50));

        let evicted = limiter.evict_idle(start + Duration::from_secs(60), Duration::from_secs(30));
        assert_eq!(evicted, 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.stats(start).identities[0].identity, Identity::from("fresh"));
    }

    #[test]
    fn test_evict_idle_keeps_windows_with_live_admissions() {
        for algorithm in BOUNDED {
            let swept = build_limiter(algorithm, policy(5, 1000));
            let untouched = build_limiter(algorithm, policy(5, 1000));
            let user = Identity::from("user");
            let start = Instant::now();

            for _ in 0..5 {
                assert!(swept.admit(&user, start).admitted);
                assert!(untouched.admit(&user, start).admitted);
            }

            let later = start + Duration::from_millis(200);
            assert_eq!(swept.evict_idle(later, Duration::from_millis(100)), 0, "{algorithm}");
            assert_eq!(swept.evict_idle(later, Duration::ZERO), 0, "{algorithm}");
            assert_eq!(swept.len(), 1);

            for i in 0..5 {
                assert_eq!(
                    swept.admit(&user, later).admitted,
                    untouched.admit(&user, later).admitted,
                    "{algorithm}: request {i}"
                );
            }
        }
    }

    #[test]
    fn test_evict_idle_drops_expired_windows_with_zero_ttl() {
        for algorithm in BOUNDED {
            let limiter = build_limiter(algorithm, policy(5, 1000));
            let start = Instant::now();
            for _ in 0..5 {
                limiter.admit(&Identity::from("user"), start);
            }

            let evicted = limiter.evict_idle(start + Duration::from_secs(2), Duration::ZERO);
            assert_eq!(evicted, 1, "{algorithm}");
            assert!(limiter.is_empty());
        }
    }

    #[test]
    fn test_stats_snapshot() {
        let limiter = FixedWindowLimiter::new(policy(5, 1000));
        let start = Instant::now();
        limiter.admit(&Identity::from("b"), start);
        limiter.admit(&Identity::from("a"), start);
        limiter.admit(&Identity::from("a"), start);

        let stats = limiter.stats(start + Duration::from_millis(250));
        assert_eq!(stats.algorithm, Algorithm::FixedWindow);
        assert_eq!(stats.limit, Some(5));
        assert_eq!(stats.period_ms, Some(1000));
        assert_eq!(
            stats.identities,
            vec![
                WindowSnapshot {
                    identity: Identity::from("a"),
                    used: 2,
                    remaining: 3,
                    reset_after_ms: 750,
                },
                WindowSnapshot {
                    identity: Identity::from("b"),
                    used: 1,
                    remaining: 4,
                    reset_after_ms: 750,
                },
            ]
        );
    }

    #[test]
    fn test_unlimited_admits_everything() {
        let limiter = build_limiter(Algorithm::Unlimited, policy(1, 1000));
        let user = Identity::from("user");
        let now = Instant::now();

        for _ in 0..1000 {
            assert!(limiter.admit(&user, now).admitted);
        }
        assert_eq!(limiter.len(), 0);
        assert_eq!(limiter.limit(), None);
        assert_eq!(limiter.stats(now).algorithm, Algorithm::Unlimited);
    }

    #[test]
    fn test_inconsistent_window_is_reset() {
        struct Corrupt {
            broken: bool,
        }

        impl WindowState for Corrupt {
            const ALGORITHM: Algorithm = Algorithm::FixedWindow;

            fn new(_policy: &QuotaPolicy, _now: Instant) -> Self {
                Self { broken: false }
            }

            fn is_consistent(&self, _policy: &QuotaPolicy) -> bool {
                !self.broken
            }

            fn try_admit(&mut self, _policy: &QuotaPolicy, _now: Instant) -> Decision {
                let decision = if self.broken {
                    Decision::reject(Duration::from_secs(1))
                } else {
                    Decision::admit(0)
                };
                self.broken = true;
                decision
            }

            fn usage(&self, _policy: &QuotaPolicy, _now: Instant) -> (u64, Duration) {
                (0, Duration::ZERO)
            }
        }

        let limiter = KeyedLimiter::<Corrupt>::new(policy(1, 1000));
        let user = Identity::from("user");
        let now = Instant::now();

        assert!(limiter.admit(&user, now).admitted);
        // The corrupted window is replaced before the next decision.
        assert!(limiter.admit(&user, now).admitted);
    }
}
