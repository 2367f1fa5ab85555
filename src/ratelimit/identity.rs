//! Identity keys and their extraction from request headers.

use axum::http::header::{HeaderMap, HeaderName};
use serde::Serialize;
use std::borrow::Borrow;
use std::fmt;

/// Default header carrying the caller's identity.
pub const DEFAULT_IDENTITY_HEADER: &str = "x-user";
/// Identity shared by every request that carries no usable header.
pub const DEFAULT_FALLBACK_IDENTITY: &str = "anonymous";

/// The key a quota is tracked against.
///
/// Compared by exact string match; no case folding or trimming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Derives an [`Identity`] from inbound request headers.
///
/// Never fails: a missing, empty or non-UTF-8 header resolves to the
/// fallback identity so that every request still gets an answer.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    header: HeaderName,
    fallback: Identity,
}

impl IdentityExtractor {
    pub fn new(header: HeaderName, fallback: Identity) -> Self {
        Self { header, fallback }
    }

    /// Name of the header the identity is read from.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Identity used when the header is unusable.
    pub fn fallback(&self) -> &Identity {
        &self.fallback
    }

    /// Extract the identity for a request.
    pub fn extract(&self, headers: &HeaderMap) -> Identity {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(Identity::from)
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(DEFAULT_IDENTITY_HEADER),
            fallback: Identity::from(DEFAULT_FALLBACK_IDENTITY),
        }
    }
}
