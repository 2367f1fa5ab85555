//! Token bucket.

use std::time::{Duration, Instant};

use super::backend::Decision;
use super::limiter::WindowState;
use super::policy::{Algorithm, QuotaPolicy};

/// Per-identity token bucket holding at most `limit` tokens.
///
/// Starts full and refills continuously at `limit / period` tokens per
/// second, computed lazily on each check rather than by a background task.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Tokens available as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refilled(&self, policy: &QuotaPolicy, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refill = elapsed.as_secs_f64() * policy.refill_rate();
        (self.tokens + refill).min(policy.limit() as f64)
    }

    fn refill(&mut self, policy: &QuotaPolicy, now: Instant) {
        self.tokens = self.refilled(policy, now);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn time_until_one_token(tokens: f64, policy: &QuotaPolicy) -> Duration {
        Duration::from_secs_f64((1.0 - tokens).max(0.0) / policy.refill_rate())
    }
}

impl WindowState for TokenBucket {
    const ALGORITHM: Algorithm = Algorithm::TokenBucket;

    fn new(policy: &QuotaPolicy, now: Instant) -> Self {
        Self {
            tokens: policy.limit() as f64,
            last_refill: now,
        }
    }

    fn is_consistent(&self, policy: &QuotaPolicy) -> bool {
        self.tokens.is_finite() && self.tokens >= 0.0 && self.tokens <= policy.limit() as f64
    }

    fn try_admit(&mut self, policy: &QuotaPolicy, now: Instant) -> Decision {
        self.refill(policy, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Decision::admit(self.tokens.floor() as u64)
        } else {
            Decision::reject(Self::time_until_one_token(self.tokens, policy))
        }
    }

    fn usage(&self, policy: &QuotaPolicy, now: Instant) -> (u64, Duration) {
        let tokens = self.refilled(policy, now);
        let remaining = tokens.floor() as u64;
        let reset_after = if remaining > 0 {
            Duration::ZERO
        } else {
            Self::time_until_one_token(tokens, policy)
        };
        (policy.limit() - remaining, reset_after)
    }
}
