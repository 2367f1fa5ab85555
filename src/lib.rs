//! quota-gate - Per-User HTTP Rate Limiting Service
//!
//! Tracks request rates per caller identity (taken from a request header)
//! and answers `GET /limited` with 200 while the caller is within quota and
//! 429 with `Retry-After` once it is exhausted.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
