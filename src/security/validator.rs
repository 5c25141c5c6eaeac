//! Request security validator.
//!
//! # Responsibilities
//! - Run header heuristics, field, structure and endpoint checks
//! - Refuse clients past their violation budget
//! - Audit and count every rejected request
//!
//! # Design Decisions
//! - Every check runs so the violation list is complete; only the budget
//!   check short-circuits
//! - Internal failures become a 500 verdict, never a pass
//! - Audit delivery failures are logged and dropped
//!
//! # Data Flow
//! ```text
//! RequestDescriptor
//!     → header heuristics
//!     → violation budget (may return 429)
//!     → query params (GET) | JSON body (POST/PUT/PATCH)
//!     → endpoint rules
//!     → Verdict (+ audit event, budget record on failure)
//! ```

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::http::{HeaderMap, Method};
use serde_json::Value;

use crate::config::PolicyConfig;
use crate::http::request::{BodyState, RequestDescriptor};
use crate::observability::metrics;
use crate::security::audit::{AuditSink, EventDetails, SecurityEvent};
use crate::security::patterns::{PRIVATE_FORWARD, SCANNER_USER_AGENT};
use crate::security::rate_limit::{ViolationBudget, WindowStore};
use crate::security::rules::EndpointRules;
use crate::security::sanitizer;
use crate::security::structure;
use crate::security::types::{ShieldError, ViolationCode, Verdict};

/// Heuristics over request headers.
pub fn validate_headers(headers: &HeaderMap) -> Vec<ViolationCode> {
    let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let mut violations = Vec::new();

    if value("user-agent").is_some_and(|ua| SCANNER_USER_AGENT.is_match(ua)) {
        violations.push(ViolationCode::SuspiciousUserAgent);
    }

    if value("referer").is_some_and(|r| r.contains("javascript:") || r.contains("data:")) {
        violations.push(ViolationCode::MaliciousReferer);
    }

    if value("origin").is_some_and(|o| o.contains("file://")) {
        violations.push(ViolationCode::FileProtocolOrigin);
    }

    if value("x-forwarded-for").is_some_and(|xff| PRIVATE_FORWARD.is_match(xff)) {
        violations.push(ViolationCode::PrivateIpForward);
    }

    violations
}

enum Outcome {
    BudgetExceeded,
    Collected(Vec<ViolationCode>),
}

/// Orchestrates every check for one request.
pub struct RequestSecurityValidator {
    policy: Arc<ArcSwap<PolicyConfig>>,
    budget: ViolationBudget,
    rules: EndpointRules,
    audit: Arc<dyn AuditSink>,
}

impl RequestSecurityValidator {
    pub fn new(
        policy: Arc<ArcSwap<PolicyConfig>>,
        violation_store: Arc<dyn WindowStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy,
            budget: ViolationBudget::new(violation_store),
            rules: EndpointRules::defaults(),
            audit,
        }
    }

    /// Replace the endpoint rule registry.
    pub fn with_rules(mut self, rules: EndpointRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn budget(&self) -> &ViolationBudget {
        &self.budget
    }

    /// Validate a request addressed to `endpoint`.
    pub fn validate_request(&self, request: &RequestDescriptor, endpoint: &str) -> Verdict {
        let start = Instant::now();
        let outcome = self.evaluate(request, endpoint);
        let elapsed = || start.elapsed().as_millis() as u64;

        let verdict = match outcome {
            Ok(Outcome::BudgetExceeded) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    client = %request.client_ip,
                    "Client exceeded violation budget"
                );
                metrics::record_rate_limited("violations");
                Verdict::excessive_violations(request.request_id, elapsed())
            }
            Ok(Outcome::Collected(violations)) if violations.is_empty() => {
                Verdict::pass(request.request_id, elapsed())
            }
            Ok(Outcome::Collected(violations)) => {
                self.report(request, endpoint, &violations);
                Verdict::reject(violations, request.request_id, elapsed())
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request.request_id,
                    error = %e,
                    "Security validation failed internally"
                );
                let detail = (!self.policy.load().is_production()).then(|| e.to_string());
                Verdict::internal(request.request_id, elapsed(), detail)
            }
        };

        metrics::record_verdict(&verdict);
        verdict
    }

    fn evaluate(&self, request: &RequestDescriptor, endpoint: &str) -> Result<Outcome, ShieldError> {
        let mut violations = validate_headers(&request.headers);

        if self.budget.is_exceeded(&request.client_ip) {
            return Ok(Outcome::BudgetExceeded);
        }

        if request.method == Method::GET {
            violations.extend(sanitizer::validate_query_params(&request.query));
        }

        match &request.body {
            BodyState::TooLarge => violations.push(ViolationCode::BodyTooLarge),
            body if request.has_inspectable_body() => {
                let bytes = match body {
                    BodyState::Buffered(bytes) => &bytes[..],
                    _ => &[][..],
                };
                violations.extend(self.validate_json(bytes)?);
            }
            _ => {}
        }

        violations.extend(self.rules.evaluate(endpoint, request));

        Ok(Outcome::Collected(violations))
    }

    fn validate_json(&self, bytes: &[u8]) -> Result<Vec<ViolationCode>, ShieldError> {
        let Ok(value) = serde_json::from_slice::<Value>(bytes) else {
            return Ok(vec![ViolationCode::InvalidJsonBody]);
        };

        let strategy = self.policy.load().pollution_strategy;
        let mut violations = structure::validate_structure(&value, strategy)?;

        let bounded = !violations
            .iter()
            .any(|c| matches!(c, ViolationCode::PayloadTooLarge | ViolationCode::ExcessiveNesting));

        if let (true, Value::Object(map)) = (bounded, &value) {
            if let Err(e) = sanitizer::validate_batch_parameters(map) {
                violations.push(e.code);
            }
        }

        Ok(violations)
    }

    fn report(&self, request: &RequestDescriptor, endpoint: &str, violations: &[ViolationCode]) {
        for code in violations {
            metrics::record_violation(code.as_str());
        }

        let event = SecurityEvent::from_violations(
            request.request_id,
            EventDetails {
                endpoint: endpoint.to_string(),
                violations: violations.to_vec(),
                client_ip: request.client_ip.clone(),
                user_agent: request.header("user-agent").map(str::to_string),
            },
        );

        if let Err(e) = self.audit.emit(&event) {
            tracing::debug!(request_id = %request.request_id, error = %e, "Audit event dropped");
        }

        self.budget.record(&request.client_ip);
    }
}
