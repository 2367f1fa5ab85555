//! Limiter trait shared by every admission algorithm.

use serde::Serialize;
use std::time::{Duration, Instant};

use super::identity::Identity;
use super::policy::Algorithm;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request consumed a unit of quota
    pub admitted: bool,
    /// How long the caller should wait before retrying (rejections only)
    pub retry_after: Option<Duration>,
    /// Quota still available to the identity after this decision
    pub remaining: u64,
}

impl Decision {
    pub fn admit(remaining: u64) -> Self {
        Self {
            admitted: true,
            retry_after: None,
            remaining,
        }
    }

    pub fn reject(retry_after: Duration) -> Self {
        Self {
            admitted: false,
            retry_after: Some(retry_after),
            remaining: 0,
        }
    }
}

/// Point-in-time usage of one identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSnapshot {
    pub identity: Identity,
    /// Quota consumed within the current window
    pub used: u64,
    /// Quota still available
    pub remaining: u64,
    /// Time until the identity regains quota, in milliseconds
    pub reset_after_ms: u64,
}

/// Serializable view of a limiter, served on `/stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    pub algorithm: Algorithm,
    pub limit: Option<u64>,
    pub period_ms: Option<u64>,
    pub identities: Vec<WindowSnapshot>,
}

/// An admission-control engine.
///
/// Implementations own the identity-to-window map outright; callers only
/// reach it through these methods. `admit` is the single atomic
/// check-and-update per identity.
pub trait Limiter: Send + Sync {
    /// Decide whether one request from `identity` at `now` is admitted.
    fn admit(&self, identity: &Identity, now: Instant) -> Decision;

    /// Forget everything tracked for `identity`. Returns whether it was tracked.
    fn unregister(&self, identity: &Identity) -> bool;

    /// Drop identities not seen for at least `idle_ttl`. Returns how many were dropped.
    fn evict_idle(&self, now: Instant, idle_ttl: Duration) -> usize;

    /// Number of identities currently tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every tracked identity.
    fn stats(&self, now: Instant) -> LimiterStats;

    /// Algorithm this limiter implements.
    fn algorithm(&self) -> Algorithm;

    /// Maximum admissions per period, `None` when unbounded.
    fn limit(&self) -> Option<u64>;
}
