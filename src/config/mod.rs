//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of the PolicyConfig held by the server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only the policy and the upstream address are hot-reloadable; listeners,
//!   timeouts and the admin API are fixed at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, Environment, ListenerConfig, LogFormat, ObservabilityConfig, PolicyConfig,
    RateLimitConfig, ShieldConfig, TimeoutConfig, UpstreamConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
