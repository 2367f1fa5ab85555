//! Command-line flags layered over the loaded configuration.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{parse_duration, LogFormat, QuotaGateConfig};
use crate::ratelimit::Algorithm;

/// Per-user HTTP rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "quota-gate", version, about)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "QUOTA_GATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    pub addr: Option<SocketAddr>,

    /// Admission algorithm (fixed_window, sliding_window_log, token_bucket, unlimited)
    #[arg(long)]
    pub algorithm: Option<Algorithm>,

    /// Requests admitted per identity per period
    #[arg(long)]
    pub limit: Option<u64>,

    /// Quota period, e.g. 1s or 500ms
    #[arg(long, value_parser = parse_duration)]
    pub period: Option<Duration>,

    /// Header carrying the caller identity
    #[arg(long)]
    pub header: Option<String>,

    /// Identity used when the header is missing
    #[arg(long)]
    pub fallback_identity: Option<String>,

    /// Evict identities idle for this long
    #[arg(long, value_parser = parse_duration)]
    pub idle_ttl: Option<Duration>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Override `config` with every flag that was given.
    pub fn apply(&self, config: &mut QuotaGateConfig) {
        let rate_limiting = &mut config.rate_limiting;
        if let Some(addr) = self.addr {
            config.server.http_addr = addr;
        }
        if let Some(algorithm) = self.algorithm {
            rate_limiting.algorithm = algorithm;
        }
        if let Some(limit) = self.limit {
            rate_limiting.limit = limit;
        }
        if let Some(period) = self.period {
            rate_limiting.period = period;
        }
        if let Some(header) = &self.header {
            rate_limiting.header_name = header.clone();
        }
        if let Some(fallback) = &self.fallback_identity {
            rate_limiting.fallback_identity = fallback.clone();
        }
        if let Some(idle_ttl) = self.idle_ttl {
            rate_limiting.idle_ttl = Some(idle_ttl);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}
