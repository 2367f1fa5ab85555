//! Configuration management for quota-gate.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `QUOTA_GATE__`-prefixed environment variables (`__` separates nested
//! keys, e.g. `QUOTA_GATE__RATE_LIMITING__LIMIT=10`). Command-line flags are
//! applied on top by the binary.

use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::error::{QuotaGateError, Result};
use crate::ratelimit::{
    Algorithm, Identity, IdentityExtractor, QuotaPolicy, DEFAULT_FALLBACK_IDENTITY,
};

const ENV_PREFIX: &str = "QUOTA_GATE";

/// Main configuration for the quota-gate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotaGateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Admission algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Requests admitted per identity per period
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Length of the quota period
    #[serde(default = "default_period", with = "duration_serde")]
    pub period: Duration,

    /// Header carrying the identity
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Identity for requests without a usable header
    #[serde(default = "default_fallback_identity")]
    pub fallback_identity: String,

    /// Forget identities idle for this long; never when unset
    #[serde(default, with = "option_duration_serde")]
    pub idle_ttl: Option<Duration>,

    /// How often idle identities are swept
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            limit: default_limit(),
            period: default_period(),
            header_name: default_header_name(),
            fallback_identity: default_fallback_identity(),
            idle_ttl: None,
            sweep_interval: default_sweep_interval(),
        }
    }
}

fn default_limit() -> u64 {
    5
}

fn default_period() -> Duration {
    Duration::from_secs(1)
}

fn default_header_name() -> String {
    "X-User".to_string()
}

fn default_fallback_identity() -> String {
    DEFAULT_FALLBACK_IDENTITY.to_string()
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

impl RateLimitingConfig {
    /// Build the quota policy these settings describe.
    pub fn policy(&self) -> Result<QuotaPolicy> {
        QuotaPolicy::new(self.limit, self.period)
    }

    /// Build the identity extractor these settings describe.
    pub fn identity_extractor(&self) -> Result<IdentityExtractor> {
        let header = HeaderName::from_bytes(self.header_name.as_bytes()).map_err(|e| {
            QuotaGateError::Config(format!("invalid header name {:?}: {}", self.header_name, e))
        })?;
        if self.fallback_identity.is_empty() {
            return Err(QuotaGateError::Config(
                "fallback identity must not be empty".to_string(),
            ));
        }
        Ok(IdentityExtractor::new(
            header,
            Identity::from(self.fallback_identity.as_str()),
        ))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl QuotaGateConfig {
    /// Load layered configuration: defaults, optional YAML file, environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

        let config: QuotaGateConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: QuotaGateConfig =
            serde_yaml::from_str(yaml).map_err(|e| QuotaGateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every derived value can be built.
    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policy()?;
        self.rate_limiting.identity_extractor()?;
        if let Some(idle_ttl) = self.rate_limiting.idle_ttl {
            if idle_ttl < self.rate_limiting.period {
                return Err(QuotaGateError::Config(format!(
                    "idle_ttl ({}) must not be shorter than period ({})",
                    format_duration(idle_ttl),
                    format_duration(self.rate_limiting.period)
                )));
            }
        }
        if self.rate_limiting.sweep_interval.is_zero() {
            return Err(QuotaGateError::Config(
                "sweep_interval must be a positive duration".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration such as `"500ms"`, `"1s"`, `"1.5s"`, `"2m"`, `"1h30m"`.
///
/// A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = || QuotaGateError::Config(format!("invalid duration: {:?}", input));

    let text = input.trim();
    if text.is_empty() {
        return Err(invalid());
    }
    if let Ok(secs) = text.parse::<f64>() {
        return nanos_to_duration(secs * 1e9).ok_or_else(invalid);
    }

    let mut nanos = 0.0;
    let mut rest = text;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: f64 = number.parse().map_err(|_| invalid())?;
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => {
                return Err(QuotaGateError::Config(format!(
                    "invalid duration unit {:?} in {:?}",
                    unit, input
                )))
            }
        };
        nanos += value * scale;
        rest = tail;
    }
    nanos_to_duration(nanos).ok_or_else(invalid)
}

fn nanos_to_duration(nanos: f64) -> Option<Duration> {
    if nanos.is_finite() && nanos >= 0.0 && nanos < u64::MAX as f64 {
        Some(Duration::from_nanos(nanos.round() as u64))
    } else {
        None
    }
}

/// Render a duration in the form `parse_duration` reads back.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if duration.subsec_nanos() % 1_000_000 != 0 {
        format!("{}us", duration.as_micros())
    } else if millis % 1000 == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", millis)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Secs(u64),
}

impl RawDuration {
    fn into_duration(self) -> Result<Duration> {
        match self {
            RawDuration::Text(text) => parse_duration(&text),
            RawDuration::Secs(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}

mod duration_serde {
    use super::{format_duration, RawDuration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        RawDuration::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }
}

mod option_duration_serde {
    use super::{format_duration, RawDuration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&format_duration(*duration)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<RawDuration>::deserialize(deserializer)?
            .map(RawDuration::into_duration)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}
