//! Quota policy and algorithm selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{QuotaGateError, Result};

/// At most `limit` admitted requests per `period` for each identity.
///
/// Immutable once built. All decision logic lives in the limiter variants so
/// the algorithm can change without touching the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaPolicy {
    limit: u64,
    period: Duration,
}

impl QuotaPolicy {
    /// Create a policy, rejecting a zero limit or an empty period.
    pub fn new(limit: u64, period: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(QuotaGateError::Config(
                "limit must be a positive integer".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(QuotaGateError::Config(
                "period must be a positive duration".to_string(),
            ));
        }
        Ok(Self { limit, period })
    }

    /// Maximum admitted requests per period.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of the quota period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Tokens regained per second by a bucket sized to this policy.
    pub fn refill_rate(&self) -> f64 {
        self.limit as f64 / self.period.as_secs_f64()
    }
}

/// Admission algorithm used by the limiter core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Counter reset once a full period has elapsed since the window start.
    #[default]
    #[serde(alias = "fixed_window_counter")]
    FixedWindow,
    /// Log of admitted instants; the strictest variant.
    SlidingWindowLog,
    /// Continuously refilled bucket of `limit` tokens.
    TokenBucket,
    /// Admit everything.
    #[serde(alias = "none")]
    Unlimited,
}

impl Algorithm {
    /// Configuration name of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed_window",
            Algorithm::SlidingWindowLog => "sliding_window_log",
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::Unlimited => "unlimited",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = QuotaGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fixed_window" | "fixed_window_counter" => Ok(Algorithm::FixedWindow),
            "sliding_window_log" => Ok(Algorithm::SlidingWindowLog),
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "unlimited" | "none" => Ok(Algorithm::Unlimited),
            other => Err(QuotaGateError::Config(format!(
                "unknown rate limit algorithm: {}",
                other
            ))),
        }
    }
}
