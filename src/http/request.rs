//! Request inspection.
//!
//! # Responsibilities
//! - Carry the request ID minted for each inbound request
//! - Snapshot a request into a `RequestDescriptor` for validation
//! - Resolve the client IP and the rate limiting identity
//!
//! # Design Decisions
//! - The descriptor owns copies of everything the validator reads, so the
//!   original request can be rebuilt and forwarded untouched
//! - Forwarding headers are trusted in a fixed order; the socket peer is
//!   the last resort
//! - API keys are never stored verbatim as limiter keys

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::http::{header, request::Parts, HeaderMap, Method, Request};
use uuid::Uuid;

use crate::security::rate_limit::{ANONYMOUS_LIMIT, API_KEY_LIMIT};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Request ID minted by the security middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

/// Access to the request ID stored in request extensions.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<Uuid>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<Uuid> {
        self.extensions().get::<RequestId>().map(|id| id.0)
    }
}

/// Body as seen by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyState {
    Empty,
    Buffered(Bytes),
    /// The body exceeded the buffering limit and was discarded.
    TooLarge,
}

/// Everything the validator needs to know about one request.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub request_id: Uuid,
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: BodyState,
    pub client_ip: String,
}

impl RequestDescriptor {
    pub fn from_parts(
        request_id: Uuid,
        parts: &Parts,
        body: BodyState,
        peer: Option<SocketAddr>,
    ) -> Self {
        Self {
            request_id,
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parse_query(parts.uri.query()),
            client_ip: client_ip(&parts.headers, peer),
            headers: parts.headers.clone(),
            body,
        }
    }

    /// First value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_query(&self, name: &str) -> bool {
        self.query.iter().any(|(key, _)| key == name)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the declared content type is JSON.
    pub fn is_json(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
    }

    /// Whether the method carries a body the validator inspects.
    pub fn has_inspectable_body(&self) -> bool {
        matches!(self.method, Method::POST | Method::PUT | Method::PATCH) && self.is_json()
    }
}

/// Decode a raw query string into ordered pairs.
pub fn parse_query(query: Option<&str>) -> Vec<(String, String)> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve the client IP from forwarding headers, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header_value("x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    header_value("x-real-ip")
        .or_else(|| header_value("cf-connecting-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    ApiKey,
    Anonymous,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::ApiKey => "api_key",
            ClientKind::Anonymous => "anonymous",
        }
    }
}

/// Rate limiting identity for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub key: String,
    pub kind: ClientKind,
}

impl ClientIdentity {
    /// Requests allowed per window for this client.
    pub fn limit(&self) -> u32 {
        match self.kind {
            ClientKind::ApiKey => API_KEY_LIMIT,
            ClientKind::Anonymous => ANONYMOUS_LIMIT,
        }
    }
}

fn presented_api_key(headers: &HeaderMap) -> Option<&str> {
    let explicit = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    explicit.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

/// Key by API key when one is presented, otherwise by client IP.
pub fn identify_client(headers: &HeaderMap, ip: &str) -> ClientIdentity {
    match presented_api_key(headers) {
        Some(api_key) => {
            let mut hasher = DefaultHasher::new();
            api_key.hash(&mut hasher);
            ClientIdentity {
                key: format!("key:{:016x}", hasher.finish()),
                kind: ClientKind::ApiKey,
            }
        }
        None => ClientIdentity {
            key: format!("ip:{ip}"),
            kind: ClientKind::Anonymous,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_ip_resolution_order() {
        let peer: SocketAddr = "192.0.2.10:5555".parse().unwrap();

        let h = headers(&[
            ("x-forwarded-for", "203.0.113.5, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&h, Some(peer)), "203.0.113.5");

        let h = headers(&[("x-real-ip", "198.51.100.2"), ("cf-connecting-ip", "198.51.100.3")]);
        assert_eq!(client_ip(&h, Some(peer)), "198.51.100.2");

        let h = headers(&[("cf-connecting-ip", "198.51.100.3")]);
        assert_eq!(client_ip(&h, Some(peer)), "198.51.100.3");

        assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.0.2.10");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_client_identity() {
        let anonymous = identify_client(&HeaderMap::new(), "203.0.113.5");
        assert_eq!(anonymous.key, "ip:203.0.113.5");
        assert_eq!(anonymous.limit(), ANONYMOUS_LIMIT);

        let by_header = identify_client(&headers(&[("x-api-key", "xbrl_live_abc")]), "203.0.113.5");
        let by_bearer = identify_client(
            &headers(&[("authorization", "Bearer xbrl_live_abc")]),
            "198.51.100.1",
        );
        assert_eq!(by_header.kind, ClientKind::ApiKey);
        assert_eq!(by_header, by_bearer);
        assert!(!by_header.key.contains("xbrl_live_abc"));
        assert_eq!(by_header.limit(), API_KEY_LIMIT);
    }

    #[test]
    fn test_descriptor_from_parts() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/companies?fiscal_year=2024&name_filter=%E3%83%88%E3%83%A8%E3%82%BF&limit=5&limit=9")
            .header("content-type", "application/json; charset=utf-8")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();

        let descriptor =
            RequestDescriptor::from_parts(Uuid::new_v4(), &parts, BodyState::Empty, None);
        assert_eq!(descriptor.path, "/api/v1/companies");
        assert_eq!(descriptor.query_value("name_filter"), Some("トヨタ"));
        assert_eq!(descriptor.query_value("limit"), Some("5"));
        assert!(descriptor.has_query("fiscal_year"));
        assert!(descriptor.has_inspectable_body());
        assert_eq!(descriptor.client_ip, "unknown");
    }
}
