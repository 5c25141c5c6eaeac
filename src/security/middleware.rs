//! Security middleware.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → CORS preflight from an allowed origin (answered directly)
//!     → volume limit per client key (429 with rate headers)
//!     → buffer body (1 MiB cap), snapshot into RequestDescriptor
//!     → RequestSecurityValidator
//!     → reject with JSON error | run handler and decorate response
//! ```
//!
//! # Design Decisions
//! - The request ID is minted here and travels with the request, the
//!   verdict, the error body and the response headers
//! - The buffered body is handed to the handler unchanged
//! - The policy is loaded once per request so a reload never splits a request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::http::request::{client_ip, identify_client, BodyState, RequestDescriptor, RequestId};
use crate::http::response::{set_request_id, verdict_response};
use crate::observability::metrics;
use crate::security::audit::AuditSink;
use crate::security::monitor::{MonitorAuditSink, SecurityMonitor};
use crate::security::headers::{self, X_SECURITY_STATUS};
use crate::security::rate_limit::{self, InMemoryWindowStore, SlidingWindowCounter, WindowStore};
use crate::security::types::Verdict;
use crate::security::validator::RequestSecurityValidator;

/// Largest request body buffered for inspection.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state of the security layer.
#[derive(Clone)]
pub struct SecurityState {
    pub policy: Arc<ArcSwap<PolicyConfig>>,
    pub validator: Arc<RequestSecurityValidator>,
    pub volume: SlidingWindowCounter,
    pub monitor: Arc<SecurityMonitor>,
    pub rate_limit_enabled: bool,
}

impl SecurityState {
    /// State backed by fresh process-local stores.
    pub fn new(
        policy: Arc<ArcSwap<PolicyConfig>>,
        rate_limit_enabled: bool,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self::with_stores(
            policy,
            rate_limit_enabled,
            Arc::new(InMemoryWindowStore::new()),
            Arc::new(InMemoryWindowStore::new()),
            audit,
        )
    }

    pub fn with_stores(
        policy: Arc<ArcSwap<PolicyConfig>>,
        rate_limit_enabled: bool,
        volume_store: Arc<dyn WindowStore>,
        violation_store: Arc<dyn WindowStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let monitor = Arc::new(SecurityMonitor::new());
        let audit: Arc<dyn AuditSink> = Arc::new(MonitorAuditSink::new(monitor.clone(), audit));
        let validator = RequestSecurityValidator::new(policy.clone(), violation_store, audit);
        Self {
            policy,
            validator: Arc::new(validator),
            volume: SlidingWindowCounter::new(volume_store),
            monitor,
            rate_limit_enabled,
        }
    }
}

fn is_preflight(request: &Request<Body>) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

/// Middleware applying the full request security pipeline.
pub async fn security_middleware(
    State(state): State<SecurityState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let policy = state.policy.load_full();

    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if is_preflight(&request) {
        if let Some(origin) = origin.as_deref().filter(|o| policy.origin_allowed(o)) {
            let mut response = StatusCode::NO_CONTENT.into_response();
            headers::apply_cors(response.headers_mut(), Some(origin), &policy);
            set_request_id(response.headers_mut(), request_id);
            metrics::record_request(&method, StatusCode::NO_CONTENT.as_u16(), start);
            return response;
        }
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    let rate_decision = if state.rate_limit_enabled {
        let identity = identify_client(request.headers(), &ip);
        let now = rate_limit::now_ms();
        let decision = state.volume.check_at(&identity.key, identity.limit(), now);

        if !decision.allowed {
            tracing::warn!(
                request_id = %request_id,
                client = %identity.key,
                limit = decision.limit,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(identity.kind.as_str());
            let mut response = verdict_response(&Verdict::rate_limited(request_id));
            headers::apply_rate_limit_headers(response.headers_mut(), &decision, now);
            metrics::record_request(&method, response.status().as_u16(), start);
            return response;
        }
        Some((decision, now))
    } else {
        None
    };

    let (mut parts, body) = request.into_parts();
    let (body_state, forward_body) = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) if bytes.is_empty() => (BodyState::Empty, Body::empty()),
        Ok(bytes) => (BodyState::Buffered(bytes.clone()), Body::from(bytes)),
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Request body not buffered");
            (BodyState::TooLarge, Body::empty())
        }
    };

    let descriptor = RequestDescriptor::from_parts(request_id, &parts, body_state, peer);
    let verdict = state.validator.validate_request(&descriptor, &descriptor.path);

    if !verdict.valid {
        let mut response = verdict_response(&verdict);
        if let Some((decision, now)) = &rate_decision {
            headers::apply_rate_limit_headers(response.headers_mut(), decision, *now);
        }
        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            code = verdict.code.as_deref().unwrap_or_default(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Request rejected"
        );
        metrics::record_request(&method, response.status().as_u16(), start);
        return response;
    }

    parts.extensions.insert(RequestId(request_id));
    set_request_id(&mut parts.headers, request_id);

    let mut response = next.run(Request::from_parts(parts, forward_body)).await;

    let response_headers = response.headers_mut();
    headers::apply_security_headers(response_headers, &policy);
    set_request_id(response_headers, request_id);
    response_headers.insert(
        HeaderName::from_static(X_SECURITY_STATUS),
        HeaderValue::from_static("VALIDATED"),
    );
    if let Some((decision, now)) = &rate_decision {
        headers::apply_rate_limit_headers(response_headers, decision, *now);
    }
    headers::apply_cors(response_headers, origin.as_deref(), &policy);

    let status = response.status().as_u16();
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = status,
        latency_ms = start.elapsed().as_millis() as u64,
        "Request completed"
    );
    metrics::record_request(&method, status, start);

    response
}
