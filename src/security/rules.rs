//! Endpoint-specific request heuristics.
//!
//! # Responsibilities
//! - Hold extra predicates that only apply to particular endpoints
//! - Evaluate every applicable rule against a request
//!
//! # Design Decisions
//! - Endpoints match on the exact path
//! - Rules are trait objects so deployments can register their own

use std::fmt;

use crate::http::request::RequestDescriptor;
use crate::security::types::ViolationCode;

/// A predicate evaluated for requests to matching endpoints.
pub trait EndpointRule: Send + Sync + fmt::Debug {
    /// Returns true if this rule applies to the endpoint path.
    fn applies_to(&self, endpoint: &str) -> bool;

    /// Violation raised by the request, if any.
    fn evaluate(&self, request: &RequestDescriptor) -> Option<ViolationCode>;
}

/// Flags requests that combine `present` parameters while omitting `absent`.
#[derive(Debug, Clone)]
pub struct ParameterCombinationRule {
    endpoint: String,
    present: Vec<String>,
    absent: String,
}

impl ParameterCombinationRule {
    pub fn new(endpoint: impl Into<String>, present: &[&str], absent: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            present: present.iter().map(|p| p.to_string()).collect(),
            absent: absent.into(),
        }
    }
}

impl EndpointRule for ParameterCombinationRule {
    fn applies_to(&self, endpoint: &str) -> bool {
        endpoint == self.endpoint
    }

    fn evaluate(&self, request: &RequestDescriptor) -> Option<ViolationCode> {
        let combined = self.present.iter().all(|p| request.has_query(p));
        (combined && !request.has_query(&self.absent))
            .then_some(ViolationCode::SuspiciousParameterCombination)
    }
}

/// Bounds the length of a single query parameter.
#[derive(Debug, Clone)]
pub struct ParameterLengthRule {
    endpoint: String,
    parameter: String,
    max_len: usize,
    code: ViolationCode,
}

impl ParameterLengthRule {
    pub fn new(
        endpoint: impl Into<String>,
        parameter: impl Into<String>,
        max_len: usize,
        code: ViolationCode,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            parameter: parameter.into(),
            max_len,
            code,
        }
    }
}

impl EndpointRule for ParameterLengthRule {
    fn applies_to(&self, endpoint: &str) -> bool {
        endpoint == self.endpoint
    }

    fn evaluate(&self, request: &RequestDescriptor) -> Option<ViolationCode> {
        request
            .query_value(&self.parameter)
            .filter(|value| value.chars().count() > self.max_len)
            .map(|_| self.code)
    }
}

/// Registry of endpoint rules.
#[derive(Debug, Default)]
pub struct EndpointRules {
    rules: Vec<Box<dyn EndpointRule>>,
}

impl EndpointRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// The rules shipped with the service.
    pub fn defaults() -> Self {
        Self::new()
            .with(ParameterCombinationRule::new(
                "/api/v1/companies",
                &["fiscal_year", "name_filter"],
                "limit",
            ))
            .with(ParameterLengthRule::new(
                "/api/v1/documents",
                "document_id",
                100,
                ViolationCode::DocumentIdTooLong,
            ))
    }

    pub fn with(mut self, rule: impl EndpointRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Violations from every rule registered for `endpoint`.
    pub fn evaluate(&self, endpoint: &str, request: &RequestDescriptor) -> Vec<ViolationCode> {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(endpoint))
            .filter_map(|rule| rule.evaluate(request))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::BodyState;
    use axum::http::Request;
    use uuid::Uuid;

    fn descriptor(uri: &str) -> RequestDescriptor {
        let (parts, _) = Request::builder().uri(uri).body(()).unwrap().into_parts();
        RequestDescriptor::from_parts(Uuid::new_v4(), &parts, BodyState::Empty, None)
    }

    #[test]
    fn test_companies_combination() {
        let rules = EndpointRules::defaults();
        let req = descriptor("/api/v1/companies?fiscal_year=2024&name_filter=Toyota");
        assert_eq!(
            rules.evaluate("/api/v1/companies", &req),
            vec![ViolationCode::SuspiciousParameterCombination]
        );

        let req = descriptor("/api/v1/companies?fiscal_year=2024&name_filter=Toyota&limit=50");
        assert!(rules.evaluate("/api/v1/companies", &req).is_empty());

        let req = descriptor("/api/v1/companies?fiscal_year=2024");
        assert!(rules.evaluate("/api/v1/companies", &req).is_empty());
    }

    #[test]
    fn test_document_id_length() {
        let rules = EndpointRules::defaults();
        let long = format!("/api/v1/documents?document_id={}", "d".repeat(101));
        assert_eq!(
            rules.evaluate("/api/v1/documents", &descriptor(&long)),
            vec![ViolationCode::DocumentIdTooLong]
        );
        let ok = format!("/api/v1/documents?document_id={}", "d".repeat(100));
        assert!(rules.evaluate("/api/v1/documents", &descriptor(&ok)).is_empty());
    }

    #[test]
    fn test_rules_are_endpoint_scoped() {
        let rules = EndpointRules::defaults();
        assert_eq!(rules.len(), 2);
        let req = descriptor("/api/v1/other?fiscal_year=2024&name_filter=Toyota");
        assert!(rules.evaluate("/api/v1/other", &req).is_empty());
    }
}
