//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → middleware.rs (preflight, volume limit, body buffering)
//!     → validator.rs (orchestration)
//!         → headers, violation budget (rate_limit.rs)
//!         → query parameters (sanitizer.rs)
//!         → JSON body (structure.rs, sanitizer.rs)
//!         → endpoint rules (rules.rs)
//!     → audit.rs (security events for rejections)
//!         → monitor.rs (per-IP and per-endpoint threat windows)
//!     → headers.rs (response decoration)
//!
//! Redirect targets:
//!     → redirect.rs (allow-listed domains and paths)
//! ```
//!
//! # Design Decisions
//! - Fail closed: any internal error rejects the request
//! - Every check reports a stable violation code
//! - No trust in client input

pub mod audit;
pub mod headers;
pub mod middleware;
pub mod monitor;
pub mod patterns;
pub mod rate_limit;
pub mod redirect;
pub mod rules;
pub mod sanitizer;
pub mod structure;
pub mod types;
pub mod validator;

pub use audit::{AuditSink, ChannelAuditSink, SecurityEvent, TracingAuditSink};
pub use middleware::{security_middleware, SecurityState};
pub use monitor::{MonitorAuditSink, SecurityMonitor, ThreatAssessment};
pub use rate_limit::{InMemoryWindowStore, SlidingWindowCounter, ViolationBudget, WindowStore};
pub use redirect::{RedirectValidation, RedirectValidator};
pub use rules::{EndpointRule, EndpointRules};
pub use types::{Severity, ShieldError, Verdict, ViolationCode};
pub use validator::RequestSecurityValidator;
