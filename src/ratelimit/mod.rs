//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod counter;
mod identity;
mod limiter;
mod policy;
mod sliding;

pub use backend::{Decision, Limiter, LimiterStats, WindowSnapshot};
pub use bucket::TokenBucket;
pub use counter::FixedWindow;
pub use identity::{
    Identity, IdentityExtractor, DEFAULT_FALLBACK_IDENTITY, DEFAULT_IDENTITY_HEADER,
};
pub use limiter::{
    build_limiter, FixedWindowLimiter, KeyedLimiter, SlidingWindowLogLimiter,
    TokenBucketLimiter, UnlimitedLimiter, WindowState,
};
pub use policy::{Algorithm, QuotaPolicy};
pub use sliding::SlidingWindowLog;
