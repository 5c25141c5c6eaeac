//! Redirect target validation.
//!
//! # Responsibilities
//! - Classify a candidate redirect as relative, same-origin or allowed external
//! - Reject open-redirect, traversal and injection vectors
//! - Produce a safe redirect target with a fallback
//!
//! # Design Decisions
//! - Checks short-circuit on the first failure
//! - Allow-lists come from `PolicyConfig`, never from the candidate
//! - The fallback is trusted and never re-validated

use std::net::IpAddr;
use std::time::Instant;

use serde::Serialize;
use url::{Host, Url};

use crate::config::PolicyConfig;

pub const MAX_REDIRECT_LEN: usize = 2048;

/// Schemes that can execute script or reach local resources.
pub const DANGEROUS_SCHEMES: &[&str] = &[
    "javascript:",
    "data:",
    "vbscript:",
    "file:",
    "ftp:",
    "about:",
    "chrome:",
    "ms-",
    "res:",
    "resource:",
    "shell:",
    "webkit-",
    "moz-",
    "opera-",
    "safari-",
    "ie-",
];

/// Ports commonly probed through redirects.
pub const SUSPICIOUS_PORTS: &[u16] = &[22, 23, 25, 110, 143, 3389];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedirectCode {
    InvalidFormat,
    UrlTooLong,
    CharacterInjection,
    DangerousSchema,
    ProtocolRelativeUrl,
    PathTraversal,
    DoubleSlash,
    EncodedPathTraversal,
    PathNotAllowed,
    UnsupportedProtocol,
    HttpsRequired,
    SuspiciousPort,
    CredentialsInUrl,
    PrivateIp,
    DomainNotAllowed,
    InvalidAbsoluteUrl,
    UnsupportedFormat,
}

/// Attack class behind a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Threat {
    CharacterInjection,
    XssRisk,
    OpenRedirect,
    DirectoryTraversal,
    UrlConfusion,
    PortScanning,
    CredentialLeakage,
    InternalNetworkAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlType {
    Relative,
    SameOrigin,
    AllowedExternal,
}

/// Outcome of validating one redirect candidate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectValidation {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sanitized_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_type: Option<UrlType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<RedirectCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat: Option<Threat>,
    pub processing_time_ms: u64,
}

// Intermediate result; timing is stamped once at the end.
type Check = Result<Accepted, Rejected>;

struct Accepted {
    url: String,
    url_type: UrlType,
    hostname: Option<String>,
}

struct Rejected {
    code: RedirectCode,
    threat: Option<Threat>,
    error: String,
}

impl Rejected {
    fn new(code: RedirectCode, error: impl Into<String>) -> Self {
        Self {
            code,
            threat: None,
            error: error.into(),
        }
    }

    fn threat(mut self, threat: Threat) -> Self {
        self.threat = Some(threat);
        self
    }
}

/// Validates redirect candidates against a policy.
pub struct RedirectValidator<'a> {
    paths: &'a [String],
    domains: Vec<String>,
    production: bool,
}

impl<'a> RedirectValidator<'a> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self {
            paths: &policy.allowed_redirect_paths,
            domains: policy.redirect_domains(),
            production: policy.is_production(),
        }
    }

    /// Validate `candidate` relative to the URL of the current request.
    pub fn validate(&self, candidate: &str, current: &str) -> RedirectValidation {
        let start = Instant::now();
        let outcome = self.check(candidate, current);
        let processing_time_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(accepted) => RedirectValidation {
                is_valid: true,
                sanitized_url: Some(accepted.url),
                url_type: Some(accepted.url_type),
                hostname: accepted.hostname,
                error: None,
                code: None,
                threat: None,
                processing_time_ms,
            },
            Err(rejected) => RedirectValidation {
                is_valid: false,
                sanitized_url: None,
                url_type: None,
                hostname: None,
                error: Some(rejected.error),
                code: Some(rejected.code),
                threat: rejected.threat,
                processing_time_ms,
            },
        }
    }

    /// The sanitized candidate when valid, otherwise `fallback`.
    pub fn generate_safe_redirect_url(
        &self,
        candidate: Option<&str>,
        fallback: &str,
        current: &str,
    ) -> String {
        let Some(candidate) = candidate.filter(|c| !c.is_empty()) else {
            return fallback.to_string();
        };

        let validation = self.validate(candidate, current);
        if let (true, Some(url)) = (validation.is_valid, validation.sanitized_url) {
            return url;
        }

        tracing::warn!(
            candidate = %candidate,
            code = ?validation.code,
            error = validation.error.as_deref().unwrap_or_default(),
            fallback = %fallback,
            "Redirect target rejected"
        );
        fallback.to_string()
    }

    fn check(&self, candidate: &str, current: &str) -> Check {
        if candidate.is_empty() {
            return Err(Rejected::new(
                RedirectCode::InvalidFormat,
                "Invalid redirect URL format",
            ));
        }

        if candidate.chars().count() > MAX_REDIRECT_LEN {
            return Err(Rejected::new(RedirectCode::UrlTooLong, "Redirect URL too long"));
        }

        if has_injected_characters(candidate) {
            return Err(Rejected::new(
                RedirectCode::CharacterInjection,
                "Dangerous characters detected in URL",
            )
            .threat(Threat::CharacterInjection));
        }

        let lowered = candidate.trim().to_lowercase();
        if let Some(scheme) = DANGEROUS_SCHEMES.iter().find(|s| lowered.starts_with(*s)) {
            return Err(Rejected::new(
                RedirectCode::DangerousSchema,
                format!("Dangerous URL scheme detected: {scheme}"),
            )
            .threat(Threat::XssRisk));
        }

        if candidate.starts_with("//") {
            return Err(Rejected::new(
                RedirectCode::ProtocolRelativeUrl,
                "Protocol-relative URLs are not allowed",
            )
            .threat(Threat::OpenRedirect));
        }

        if candidate.starts_with('/') {
            return self.check_relative(candidate);
        }

        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            return self.check_absolute(candidate, current);
        }

        Err(Rejected::new(
            RedirectCode::UnsupportedFormat,
            "Unsupported URL format",
        ))
    }

    fn check_relative(&self, path: &str) -> Check {
        if path.contains("..")
            || path.contains('\\')
            || path.contains("%2e%2e")
            || path.contains("%5c")
        {
            return Err(Rejected::new(
                RedirectCode::PathTraversal,
                "Path traversal detected in redirect URL",
            )
            .threat(Threat::DirectoryTraversal));
        }

        if path.contains("//") {
            return Err(Rejected::new(
                RedirectCode::DoubleSlash,
                "Double slashes detected in path",
            )
            .threat(Threat::UrlConfusion));
        }

        let once = urlencoding::decode(path)
            .map_err(|_| Rejected::new(RedirectCode::InvalidFormat, "Malformed URL encoding"))?;
        let twice = urlencoding::decode(&once)
            .map_err(|_| Rejected::new(RedirectCode::InvalidFormat, "Malformed URL encoding"))?;

        let traverses = |decoded: &str| {
            decoded != path && (decoded.contains("..") || decoded.contains('\\'))
        };
        if traverses(&once) || traverses(&twice) {
            return Err(Rejected::new(
                RedirectCode::EncodedPathTraversal,
                "Encoded path traversal detected",
            )
            .threat(Threat::DirectoryTraversal));
        }

        let bare = path.split(['?', '#']).next().unwrap_or_default();
        let allowed = self.paths.iter().any(|allowed| {
            bare == allowed
                || bare
                    .strip_prefix(allowed.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });

        if !allowed {
            return Err(Rejected::new(
                RedirectCode::PathNotAllowed,
                format!("Path not in allowed list: {bare}"),
            ));
        }

        Ok(Accepted {
            url: path.to_string(),
            url_type: UrlType::Relative,
            hostname: None,
        })
    }

    fn check_absolute(&self, candidate: &str, current: &str) -> Check {
        let url = Url::parse(candidate).map_err(|e| {
            Rejected::new(
                RedirectCode::InvalidAbsoluteUrl,
                format!("Invalid absolute URL: {e}"),
            )
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Rejected::new(
                RedirectCode::UnsupportedProtocol,
                format!("Unsupported protocol: {}", url.scheme()),
            ));
        }

        if self.production && url.scheme() != "https" {
            return Err(Rejected::new(
                RedirectCode::HttpsRequired,
                "HTTPS required in production",
            ));
        }

        if let Some(port) = url.port().filter(|p| SUSPICIOUS_PORTS.contains(p)) {
            return Err(Rejected::new(
                RedirectCode::SuspiciousPort,
                format!("Suspicious port detected: {port}"),
            )
            .threat(Threat::PortScanning));
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(Rejected::new(
                RedirectCode::CredentialsInUrl,
                "URL contains authentication credentials",
            )
            .threat(Threat::CredentialLeakage));
        }

        let hostname = match url.host() {
            Some(Host::Ipv4(ip)) if is_internal(IpAddr::V4(ip)) => {
                return Err(private_ip());
            }
            Some(Host::Ipv6(ip)) if is_internal(IpAddr::V6(ip)) => {
                return Err(private_ip());
            }
            Some(host) => host.to_string(),
            None => {
                return Err(Rejected::new(
                    RedirectCode::InvalidAbsoluteUrl,
                    "Invalid absolute URL: missing host",
                ));
            }
        };

        if !self.domain_allowed(&hostname) {
            return Err(Rejected::new(
                RedirectCode::DomainNotAllowed,
                format!("Domain not in allowed list: {hostname}"),
            )
            .threat(Threat::OpenRedirect));
        }

        let same_origin = Url::parse(current)
            .map(|current| current.origin() == url.origin())
            .unwrap_or(false);

        Ok(Accepted {
            url: url.to_string(),
            url_type: if same_origin {
                UrlType::SameOrigin
            } else {
                UrlType::AllowedExternal
            },
            hostname: Some(hostname),
        })
    }

    fn domain_allowed(&self, hostname: &str) -> bool {
        self.domains.iter().any(|domain| {
            if let Some(suffix) = domain.strip_prefix('*') {
                return hostname.ends_with(suffix);
            }
            hostname == domain
                || hostname
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

fn private_ip() -> Rejected {
    Rejected::new(RedirectCode::PrivateIp, "Private IP addresses not allowed")
        .threat(Threat::InternalNetworkAccess)
}

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback(),
    }
}

fn has_injected_characters(candidate: &str) -> bool {
    if candidate
        .chars()
        .any(|c| c.is_ascii_control() || matches!(c, '<' | '>' | '"' | '\''))
    {
        return true;
    }
    let lowered = candidate.to_ascii_lowercase();
    lowered.contains("%00") || lowered.contains("%0d") || lowered.contains("%0a")
}
