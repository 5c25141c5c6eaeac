//! Violation taxonomy, verdicts and error definitions.

use std::fmt;

use axum::http::StatusCode;
use serde::{Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Machine-readable identifier for a single validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationCode {
    // Field shape
    EmptyParameter,
    PathTooLong,
    PathInjection,
    AbsolutePath,
    UncPath,
    UrlInPath,
    InvalidSanitized,
    QueryTooLong,
    InvalidFiscalYear,
    FiscalYearRange,
    CursorTooLong,
    InvalidCursor,
    MaliciousCursor,
    CursorDecodeError,
    InvalidNumber,
    NumberOutOfRange,
    InvalidFileType,
    InvalidCompanyId,

    // Attack signatures
    SqlInjection,
    XssDetected,
    PrototypePollution,
    NosqlInjectionOperator,
    NosqlInjectionFunction,

    // Structure
    ExcessiveNesting,
    PayloadTooLarge,
    BodyTooLarge,
    InvalidJsonBody,
    BatchTooLarge,

    // Header heuristics
    SuspiciousUserAgent,
    MaliciousReferer,
    FileProtocolOrigin,
    PrivateIpForward,

    // Endpoint rules
    SuspiciousParameterCombination,
    DocumentIdTooLong,

    // Rate
    RateLimitSecurity,
    ExcessiveViolations,
    RateLimitExceeded,

    // Internal
    InternalError,
    SecurityError,
}

impl ViolationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyParameter => "EMPTY_PARAMETER",
            Self::PathTooLong => "PATH_TOO_LONG",
            Self::PathInjection => "PATH_INJECTION",
            Self::AbsolutePath => "ABSOLUTE_PATH",
            Self::UncPath => "UNC_PATH",
            Self::UrlInPath => "URL_IN_PATH",
            Self::InvalidSanitized => "INVALID_SANITIZED",
            Self::QueryTooLong => "QUERY_TOO_LONG",
            Self::InvalidFiscalYear => "INVALID_FISCAL_YEAR",
            Self::FiscalYearRange => "FISCAL_YEAR_RANGE",
            Self::CursorTooLong => "CURSOR_TOO_LONG",
            Self::InvalidCursor => "INVALID_CURSOR",
            Self::MaliciousCursor => "MALICIOUS_CURSOR",
            Self::CursorDecodeError => "CURSOR_DECODE_ERROR",
            Self::InvalidNumber => "INVALID_NUMBER",
            Self::NumberOutOfRange => "NUMBER_OUT_OF_RANGE",
            Self::InvalidFileType => "INVALID_FILE_TYPE",
            Self::InvalidCompanyId => "INVALID_COMPANY_ID",
            Self::SqlInjection => "SQL_INJECTION",
            Self::XssDetected => "XSS_DETECTED",
            Self::PrototypePollution => "PROTOTYPE_POLLUTION",
            Self::NosqlInjectionOperator => "NOSQL_INJECTION_OPERATOR",
            Self::NosqlInjectionFunction => "NOSQL_INJECTION_FUNCTION",
            Self::ExcessiveNesting => "EXCESSIVE_NESTING",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::BodyTooLarge => "BODY_TOO_LARGE",
            Self::InvalidJsonBody => "INVALID_JSON_BODY",
            Self::BatchTooLarge => "BATCH_TOO_LARGE",
            Self::SuspiciousUserAgent => "SUSPICIOUS_USER_AGENT",
            Self::MaliciousReferer => "MALICIOUS_REFERER",
            Self::FileProtocolOrigin => "FILE_PROTOCOL_ORIGIN",
            Self::PrivateIpForward => "PRIVATE_IP_FORWARD",
            Self::SuspiciousParameterCombination => "SUSPICIOUS_PARAMETER_COMBINATION",
            Self::DocumentIdTooLong => "DOCUMENT_ID_TOO_LONG",
            Self::RateLimitSecurity => "RATE_LIMIT_SECURITY",
            Self::ExcessiveViolations => "EXCESSIVE_VIOLATIONS",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::SecurityError => "SECURITY_ERROR",
        }
    }

    /// Fixed HTTP status associated with this code.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimitSecurity | Self::ExcessiveViolations | Self::RateLimitExceeded => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::InternalError | Self::SecurityError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Severity used when raising an audit event for a violation set.
    pub fn severity(&self) -> Severity {
        match self {
            Self::SqlInjection | Self::PathInjection => Severity::High,
            Self::XssDetected => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

impl fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ViolationCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Audit severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Highest severity across a set of violations.
    pub fn classify(violations: &[ViolationCode]) -> Self {
        violations
            .iter()
            .map(ViolationCode::severity)
            .max()
            .unwrap_or(Severity::Low)
    }

    /// Audit event type for this severity.
    pub fn event_type(&self) -> &'static str {
        match self {
            Severity::High | Severity::Critical => "INJECTION_ATTEMPT",
            Severity::Medium => "XSS_ATTEMPT",
            Severity::Low => "VALIDATION_ERROR",
        }
    }
}

/// Failure of a single field validator.
///
/// Always maps to 400; the orchestrator collects the code instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} ({code})")]
pub struct FieldError {
    pub code: ViolationCode,
    pub message: String,
}

impl FieldError {
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// Result type for field validators.
pub type FieldResult<T> = Result<T, FieldError>;

/// Unexpected failures inside the pipeline.
#[derive(Debug, Error)]
pub enum ShieldError {
    /// A value could not be serialized for inspection.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Pass/fail result for one request.
///
/// Constructed only through the associated functions so that a failing
/// verdict always carries at least one code and a non-2xx status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub valid: bool,
    pub violations: Vec<ViolationCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip)]
    pub status: StatusCode,
    pub request_id: Uuid,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Verdict {
    pub fn pass(request_id: Uuid, processing_time_ms: u64) -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
            error: None,
            code: None,
            status: StatusCode::OK,
            request_id,
            processing_time_ms,
            detail: None,
        }
    }

    /// Failing verdict for collected field/structure violations.
    ///
    /// An empty list is promoted to `SECURITY_ERROR` to keep the invariant.
    pub fn reject(
        mut violations: Vec<ViolationCode>,
        request_id: Uuid,
        processing_time_ms: u64,
    ) -> Self {
        if violations.is_empty() {
            violations.push(ViolationCode::SecurityError);
        }
        let code = violations[0].as_str().to_string();
        Self {
            valid: false,
            violations,
            error: Some("Security validation failed".to_string()),
            code: Some(code),
            status: StatusCode::BAD_REQUEST,
            request_id,
            processing_time_ms,
            detail: None,
        }
    }

    /// Client is past its violation budget.
    pub fn excessive_violations(request_id: Uuid, processing_time_ms: u64) -> Self {
        Self {
            valid: false,
            violations: vec![ViolationCode::ExcessiveViolations],
            error: Some("Too many security violations".to_string()),
            code: Some(ViolationCode::RateLimitSecurity.as_str().to_string()),
            status: StatusCode::TOO_MANY_REQUESTS,
            request_id,
            processing_time_ms,
            detail: None,
        }
    }

    /// Volume limit exceeded for the client key.
    pub fn rate_limited(request_id: Uuid) -> Self {
        Self {
            valid: false,
            violations: vec![ViolationCode::RateLimitExceeded],
            error: Some("Rate limit exceeded".to_string()),
            code: Some(ViolationCode::RateLimitExceeded.as_str().to_string()),
            status: StatusCode::TOO_MANY_REQUESTS,
            request_id,
            processing_time_ms: 0,
            detail: None,
        }
    }

    /// Unexpected failure; `detail` is only populated outside production.
    pub fn internal(request_id: Uuid, processing_time_ms: u64, detail: Option<String>) -> Self {
        Self {
            valid: false,
            violations: vec![ViolationCode::InternalError],
            error: Some("Security validation error".to_string()),
            code: Some(ViolationCode::SecurityError.as_str().to_string()),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            request_id,
            processing_time_ms,
            detail,
        }
    }

    /// Comma-joined codes for the `X-Security-Violation` header.
    pub fn violation_header(&self) -> String {
        self.violations
            .iter()
            .map(ViolationCode::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_serialization() {
        let json = serde_json::to_string(&vec![
            ViolationCode::SqlInjection,
            ViolationCode::NosqlInjectionOperator,
        ])
        .unwrap();
        assert_eq!(json, r#"["SQL_INJECTION","NOSQL_INJECTION_OPERATOR"]"#);
    }

    #[test]
    fn test_code_status() {
        assert_eq!(ViolationCode::PathInjection.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ViolationCode::ExcessiveViolations.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ViolationCode::InternalError.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_severity_classification() {
        assert_eq!(
            Severity::classify(&[ViolationCode::InvalidNumber, ViolationCode::SqlInjection]),
            Severity::High
        );
        assert_eq!(Severity::classify(&[ViolationCode::XssDetected]), Severity::Medium);
        assert_eq!(
            Severity::classify(&[ViolationCode::SuspiciousParameterCombination]),
            Severity::Low
        );
        assert_eq!(Severity::High.event_type(), "INJECTION_ATTEMPT");
    }

    #[test]
    fn test_failing_verdict_invariant() {
        let verdict = Verdict::reject(Vec::new(), Uuid::new_v4(), 0);
        assert!(!verdict.valid);
        assert!(!verdict.violations.is_empty());
        assert!(!verdict.status.is_success());

        let verdict = Verdict::reject(
            vec![ViolationCode::InvalidFiscalYear, ViolationCode::XssDetected],
            Uuid::new_v4(),
            3,
        );
        assert_eq!(verdict.code.as_deref(), Some("INVALID_FISCAL_YEAR"));
        assert_eq!(verdict.violation_header(), "INVALID_FISCAL_YEAR,XSS_DETECTED");
    }

    #[test]
    fn test_field_error_display() {
        let err = FieldError::new(ViolationCode::InvalidCursor, "Invalid cursor format");
        assert_eq!(err.to_string(), "Invalid cursor format (INVALID_CURSOR)");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
