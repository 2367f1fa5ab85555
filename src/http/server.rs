//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::service::{router, AppState};
use crate::config::QuotaGateConfig;
use crate::error::{QuotaGateError, Result};

/// HTTP server for the rate-limited endpoints.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Handler state, including the active limiter
    state: AppState,
    /// Idle identities older than this are evicted; `None` keeps them forever
    idle_ttl: Option<Duration>,
    /// How often the idle sweep runs
    sweep_interval: Duration,
}

impl HttpServer {
    /// Create a new server that never evicts identities.
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            addr,
            state,
            idle_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Build a server from the full service configuration.
    pub fn from_config(config: &QuotaGateConfig) -> Result<Self> {
        let state = AppState::from_config(&config.rate_limiting)?;
        Ok(Self::new(config.server.http_addr, state)
            .with_idle_eviction(config.rate_limiting.idle_ttl, config.rate_limiting.sweep_interval))
    }

    /// Evict identities idle for `idle_ttl`, checking every `sweep_interval`.
    ///
    /// Windows still holding admissions inside their period are kept
    /// regardless of `idle_ttl`.
    pub fn with_idle_eviction(mut self, idle_ttl: Option<Duration>, sweep_interval: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self.sweep_interval = sweep_interval;
        self
    }

    /// Handler state shared with the running server.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server fails.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            QuotaGateError::Io(e)
        })?;
        self.serve_on(listener, signal).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Starting HTTP server for rate limited endpoints");

        let sweeper = self.spawn_sweeper();
        let result = axum::serve(listener, router(self.state))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                QuotaGateError::Server(e.to_string())
            });

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        result
    }

    fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let idle_ttl = self.idle_ttl?;
        let state = self.state.clone();
        let period = self.sweep_interval;
        info!(
            idle_ttl_ms = idle_ttl.as_millis() as u64,
            sweep_interval_ms = period.as_millis() as u64,
            "Idle rate window eviction enabled"
        );

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = state.evict_idle(idle_ttl);
                if evicted > 0 {
                    debug!(evicted, "Evicted idle rate windows");
                }
            }
        }))
    }
}
