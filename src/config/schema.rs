//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::security::structure::PollutionStrategy;

/// Root configuration for the shield service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (bind address, connection cap).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Data backend validated requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Allow-lists and environment shared by every security component.
    pub policy: PolicyConfig,

    /// Volume rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Idle upstream connection timeout in seconds.
    pub idle_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
            idle_secs: 60,
        }
    }
}

/// Data backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend address (e.g., "127.0.0.1:3000"). Unset means no forwarding.
    pub address: Option<String>,
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Allow-lists and deployment facts consumed by the redirect validator,
/// the CSP and the CORS decoration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub environment: Environment,

    /// Hosts a redirect may target. `*.example.com` matches any subdomain.
    pub allowed_domains: Vec<String>,

    /// Relative paths (and their sub-paths) a redirect may target.
    pub allowed_redirect_paths: Vec<String>,

    /// Origins that receive CORS response headers.
    pub allowed_origins: Vec<String>,

    /// Public application URL; its host joins the redirect domains.
    pub app_url: Option<String>,

    /// Public site URL; its host joins the redirect domains.
    pub site_url: Option<String>,

    /// Deployment host name; joins the redirect domains.
    pub deployment_domain: Option<String>,

    /// Origin of the data backend, allowed in CSP `connect-src`.
    pub data_backend_origin: Option<String>,

    /// Redirect target used when a candidate is missing or rejected.
    pub default_redirect: String,

    pub pollution_strategy: PollutionStrategy,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            allowed_domains: vec![
                "localhost".to_string(),
                "127.0.0.1".to_string(),
                "xbrl-api-minimal.vercel.app".to_string(),
            ],
            allowed_redirect_paths: [
                "/dashboard",
                "/dashboard/settings",
                "/dashboard/api-keys",
                "/dashboard/usage",
                "/dashboard/billing",
                "/profile",
                "/auth/verify-email",
                "/auth/reset-password",
                "/auth/update-password",
                "/welcome",
                "/onboarding",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "https://xbrl-api-minimal.vercel.app".to_string(),
            ],
            app_url: None,
            site_url: None,
            deployment_domain: None,
            data_backend_origin: None,
            default_redirect: "/dashboard".to_string(),
            pollution_strategy: PollutionStrategy::StringScan,
        }
    }
}

impl PolicyConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Configured domains plus hosts derived from the deployment URLs.
    pub fn redirect_domains(&self) -> Vec<String> {
        let derived = [&self.app_url, &self.site_url, &self.deployment_domain]
            .into_iter()
            .flatten()
            .filter_map(|value| host_of(value));

        let mut domains = self.allowed_domains.clone();
        for host in derived {
            if !domains.contains(&host) {
                domains.push(host);
            }
        }
        domains
    }

    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.iter().any(|allowed| allowed == origin)
    }
}

// Accepts either a bare host name or a full URL.
fn host_of(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.contains("://") {
        return Url::parse(value)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
    }
    Some(value.trim_end_matches('/').to_string())
}

/// Rate limiting configuration.
///
/// The volume tiers themselves are fixed; only the switch is configurable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable volume rate limiting.
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
