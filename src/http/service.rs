//! Rate-limited HTTP endpoints.

use axum::extract::State;
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, Span};

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::ratelimit::{build_limiter, IdentityExtractor, Limiter, LimiterStats};

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

struct SlotState {
    current: Arc<dyn Limiter>,
    previous: Option<Arc<dyn Limiter>>,
}

/// Holds the active limiter and allows swapping it at runtime.
///
/// Handlers hold the read lock only long enough to clone the `Arc`, so a swap
/// never waits on in-flight admission checks.
pub struct LimiterSlot {
    state: RwLock<SlotState>,
}

impl LimiterSlot {
    pub fn new(limiter: Arc<dyn Limiter>) -> Self {
        Self {
            state: RwLock::new(SlotState {
                current: limiter,
                previous: None,
            }),
        }
    }

    /// The limiter requests are currently checked against.
    pub fn current(&self) -> Arc<dyn Limiter> {
        self.state.read().current.clone()
    }

    /// Install `limiter`, remembering the old one for [`revert`](Self::revert).
    pub fn replace(&self, limiter: Arc<dyn Limiter>) -> Arc<dyn Limiter> {
        let mut state = self.state.write();
        let old = std::mem::replace(&mut state.current, limiter);
        state.previous = Some(old.clone());
        info!(algorithm = %state.current.algorithm(), "Active rate limiter replaced");
        old
    }

    /// Drop idle identities from the active limiter and the one kept for
    /// `revert`.
    pub fn evict_idle(&self, now: Instant, idle_ttl: Duration) -> usize {
        let (current, previous) = {
            let state = self.state.read();
            (state.current.clone(), state.previous.clone())
        };
        let mut evicted = current.evict_idle(now, idle_ttl);
        if let Some(previous) = previous {
            evicted += previous.evict_idle(now, idle_ttl);
        }
        evicted
    }

    /// Restore the limiter active before the last `replace`.
    ///
    /// Returns `false` when there is nothing to revert to.
    pub fn revert(&self) -> bool {
        let mut state = self.state.write();
        match state.previous.take() {
            Some(previous) => {
                state.current = previous;
                info!(algorithm = %state.current.algorithm(), "Active rate limiter reverted");
                true
            }
            None => false,
        }
    }
}

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    limiters: Arc<LimiterSlot>,
    extractor: Arc<IdentityExtractor>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create state around `limiter` using the system clock.
    pub fn new(limiter: Arc<dyn Limiter>, extractor: IdentityExtractor) -> Self {
        Self {
            limiters: Arc::new(LimiterSlot::new(limiter)),
            extractor: Arc::new(extractor),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Build state from rate limiting settings.
    pub fn from_config(config: &RateLimitingConfig) -> Result<Self> {
        let limiter = build_limiter(config.algorithm, config.policy()?);
        Ok(Self::new(limiter, config.identity_extractor()?))
    }

    /// Replace the time source, mainly for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn limiters(&self) -> &LimiterSlot {
        &self.limiters
    }

    pub fn extractor(&self) -> &IdentityExtractor {
        &self.extractor
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Drop identities idle for at least `idle_ttl` from the swappable limiters.
    pub fn evict_idle(&self, idle_ttl: Duration) -> usize {
        self.limiters.evict_idle(self.clock.now(), idle_ttl)
    }
}

/// Build the router serving `/limited`, `/unlimited` and `/stats`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/limited", get(limited))
        .route("/unlimited", get(unlimited))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct DecisionBody<'a> {
    status: u16,
    identity: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<u64>,
}

/// `Retry-After` value in whole seconds, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

/// Admit or reject one request against the caller's quota.
///
/// Exactly one admission check per request; the response is 200 or 429.
#[instrument(skip_all, fields(identity = tracing::field::Empty))]
async fn limited(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let identity = state.extractor.extract(&headers);
    Span::current().record("identity", identity.as_str());

    let limiter = state.limiters.current();
    let decision = limiter.admit(&identity, state.clock.now());
    let limit = limiter.limit();

    let status = if decision.admitted {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let body = DecisionBody {
        status: status.as_u16(),
        identity: identity.as_str(),
        remaining: limit.map(|_| decision.remaining),
    };

    let mut response = (status, Json(body)).into_response();
    let headers = response.headers_mut();
    if let Some(limit) = limit {
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(decision.remaining));
    }
    if let Some(retry_after) = decision.retry_after {
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    }
    response
}

async fn unlimited() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": 200 }))
}

async fn stats(State(state): State<AppState>) -> Json<LimiterStats> {
    Json(state.limiters.current().stats(state.clock.now()))
}
