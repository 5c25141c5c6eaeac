//! API security shield library.
//!
//! Validates every inbound request (headers, query parameters, JSON bodies,
//! endpoint heuristics, rate limits) before it reaches the data backend, and
//! issues only allow-listed redirects.

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::ShieldConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
