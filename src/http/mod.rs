//! HTTP adapter exposing the limiter on `/limited`.

mod server;
mod service;

pub use server::HttpServer;
pub use service::{retry_after_secs, router, AppState, LimiterSlot};
