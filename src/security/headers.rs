//! Response decoration.
//!
//! # Responsibilities
//! - Add security response headers and the content security policy
//! - Add CORS headers for allow-listed origins
//! - Add rate limit headers
//!
//! # Design Decisions
//! - Production adds HSTS and cross-origin isolation headers
//! - CORS headers are only ever emitted for an exact origin match
//! - Values built from configuration that are not valid header values are
//!   skipped and logged

use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue};

use crate::config::PolicyConfig;
use crate::security::rate_limit::RateLimitDecision;

pub const X_SECURITY_STATUS: &str = "x-security-status";
pub const X_SECURITY_VIOLATION: &str = "x-security-violation";

const PERMISSIONS_POLICY: &str = "accelerometer=(), camera=(), geolocation=(), gyroscope=(), \
     magnetometer=(), microphone=(), payment=(), usb=()";
const HSTS: &str = "max-age=31536000; includeSubDomains; preload";
const CORS_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const CORS_HEADERS: &str = "Content-Type, Authorization, X-API-Key";

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!(header = %name, "Skipping invalid header value"),
    }
}

fn set_static(headers: &mut HeaderMap, name: &'static str, value: &'static str) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
}

/// Content security policy for the configured environment.
pub fn content_security_policy(policy: &PolicyConfig) -> String {
    let connect_src = match policy.data_backend_origin.as_deref() {
        Some(origin) if !origin.is_empty() => format!("connect-src 'self' {origin}"),
        _ => "connect-src 'self'".to_string(),
    };

    let directives: Vec<String> = if policy.is_production() {
        vec![
            "default-src 'self'".into(),
            "script-src 'self' 'unsafe-inline'".into(),
            "style-src 'self' 'unsafe-inline'".into(),
            "img-src 'self' data: https: blob:".into(),
            "font-src 'self' data:".into(),
            connect_src,
            "frame-ancestors 'none'".into(),
            "base-uri 'self'".into(),
            "form-action 'self'".into(),
            "worker-src 'self' blob:".into(),
        ]
    } else {
        vec![
            "default-src 'self'".into(),
            "script-src 'self' 'unsafe-inline' 'unsafe-eval'".into(),
            "style-src 'self' 'unsafe-inline'".into(),
            "img-src 'self' data: https:".into(),
            "font-src 'self' data:".into(),
            connect_src,
            "frame-ancestors 'none'".into(),
            "base-uri 'self'".into(),
            "form-action 'self'".into(),
        ]
    };

    directives.join("; ")
}

/// Headers added to every response that passed validation.
pub fn apply_security_headers(headers: &mut HeaderMap, policy: &PolicyConfig) {
    set_static(headers, "x-content-type-options", "nosniff");
    set_static(headers, "x-frame-options", "DENY");
    set_static(headers, "x-xss-protection", "1; mode=block");
    set_static(headers, "referrer-policy", "strict-origin-when-cross-origin");
    set_static(headers, "permissions-policy", PERMISSIONS_POLICY);
    set(
        headers,
        header::CONTENT_SECURITY_POLICY,
        &content_security_policy(policy),
    );

    if policy.is_production() {
        set_static(headers, "strict-transport-security", HSTS);
        set_static(headers, "x-dns-prefetch-control", "off");
        set_static(headers, "x-permitted-cross-domain-policies", "none");
        set_static(headers, "cross-origin-opener-policy", "same-origin");
        set_static(headers, "cross-origin-resource-policy", "same-origin");
    }
}

/// CORS headers, only for origins on the allow-list.
///
/// Returns whether headers were added.
pub fn apply_cors(headers: &mut HeaderMap, origin: Option<&str>, policy: &PolicyConfig) -> bool {
    let Some(origin) = origin.filter(|o| policy.origin_allowed(o)) else {
        return false;
    };

    set(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
    set_static(headers, "access-control-allow-credentials", "true");
    set_static(headers, "access-control-allow-methods", CORS_METHODS);
    set_static(headers, "access-control-allow-headers", CORS_HEADERS);
    true
}

/// Rate limit headers; `Retry-After` is only added for refusals.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, now_ms: u64) {
    set(headers, HeaderName::from_static("x-ratelimit-limit"), &decision.limit.to_string());
    set(
        headers,
        HeaderName::from_static("x-ratelimit-remaining"),
        &decision.remaining.to_string(),
    );
    set(
        headers,
        HeaderName::from_static("x-ratelimit-reset"),
        &decision.reset_rfc3339(),
    );
    if !decision.allowed {
        set(
            headers,
            header::RETRY_AFTER,
            &decision.retry_after_secs(now_ms).to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    #[test]
    fn test_development_headers() {
        let policy = PolicyConfig {
            data_backend_origin: Some("https://data.example.com".to_string()),
            ..PolicyConfig::default()
        };
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers, &policy);

        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert!(headers.get("strict-transport-security").is_none());
        let csp = headers["content-security-policy"].to_str().unwrap();
        assert!(csp.contains("'unsafe-eval'"));
        assert!(csp.contains("connect-src 'self' https://data.example.com"));
    }

    #[test]
    fn test_production_headers() {
        let policy = PolicyConfig {
            environment: Environment::Production,
            ..PolicyConfig::default()
        };
        let mut headers = HeaderMap::new();
        apply_security_headers(&mut headers, &policy);

        assert_eq!(headers["strict-transport-security"], HSTS);
        let csp = headers["content-security-policy"].to_str().unwrap();
        assert!(!csp.contains("'unsafe-eval'"));
        assert!(csp.contains("connect-src 'self'; "));
    }

    #[test]
    fn test_cors_only_for_allowed_origins() {
        let policy = PolicyConfig::default();

        let mut headers = HeaderMap::new();
        assert!(apply_cors(&mut headers, Some("http://localhost:3000"), &policy));
        assert_eq!(headers["access-control-allow-origin"], "http://localhost:3000");
        assert_eq!(headers["vary"], "Origin");

        let mut headers = HeaderMap::new();
        assert!(!apply_cors(&mut headers, Some("https://evil.com"), &policy));
        assert!(!apply_cors(&mut headers, None, &policy));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_rate_limit_headers() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 30,
            remaining: 0,
            reset_time_ms: 1_700_000_060_000,
        };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &decision, 1_700_000_030_000);
        assert_eq!(headers["x-ratelimit-limit"], "30");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "2023-11-14T22:14:20.000Z");
        assert_eq!(headers["retry-after"], "30");

        let allowed = RateLimitDecision { allowed: true, remaining: 12, ..decision };
        let mut headers = HeaderMap::new();
        apply_rate_limit_headers(&mut headers, &allowed, 1_700_000_030_000);
        assert!(headers.get("retry-after").is_none());
    }
}
