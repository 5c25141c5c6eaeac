//! Response construction.
//!
//! # Responsibilities
//! - Render failing verdicts as the JSON error contract
//! - Attach request correlation headers
//! - Map upstream failures to gateway status codes
//!
//! # Design Decisions
//! - Error bodies never carry internal detail unless the verdict does, and
//!   the validator only sets it outside production
//! - Hop-by-hop headers are stripped from upstream responses

use axum::body::Body;
use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::http::request::X_REQUEST_ID;
use crate::security::headers::X_SECURITY_VIOLATION;
use crate::security::types::{ViolationCode, Verdict};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// JSON body of a rejected request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    pub code: &'a str,
    pub violations: &'a [ViolationCode],
    pub request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'a str>,
}

pub fn set_request_id(headers: &mut HeaderMap, request_id: Uuid) {
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        headers.insert(HeaderName::from_static(X_REQUEST_ID), value);
    }
}

/// Render a failing verdict.
pub fn verdict_response(verdict: &Verdict) -> Response {
    let fallback_code = ViolationCode::SecurityError.as_str();
    let body = ErrorBody {
        error: verdict.error.as_deref().unwrap_or("Security validation failed"),
        code: verdict.code.as_deref().unwrap_or(fallback_code),
        violations: &verdict.violations,
        request_id: verdict.request_id,
        detail: verdict.detail.as_deref(),
    };

    let mut response = (verdict.status, Json(body)).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&verdict.violation_header()) {
        headers.insert(HeaderName::from_static(X_SECURITY_VIOLATION), value);
    }
    set_request_id(headers, verdict.request_id);
    response
}

/// Plain-text gateway error.
pub fn gateway_error(status: StatusCode, message: &'static str, request_id: Uuid) -> Response {
    let mut response = (status, message).into_response();
    set_request_id(response.headers_mut(), request_id);
    response
}

/// Convert an upstream response for the client.
pub fn from_upstream<B>(response: axum::http::Response<B>) -> Response
where
    B: axum::body::HttpBody<Data = axum::body::Bytes> + Send + 'static,
    B::Error: Into<axum::BoxError>,
{
    let (mut parts, body) = response.into_parts();
    for name in HOP_BY_HOP {
        parts.headers.remove(*name);
    }
    Response::from_parts(parts, Body::new(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_verdict_response_contract() {
        let verdict = Verdict::reject(
            vec![ViolationCode::SqlInjection, ViolationCode::XssDetected],
            Uuid::new_v4(),
            2,
        );
        let response = verdict_response(&verdict);

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-security-violation"], "SQL_INJECTION,XSS_DETECTED");
        assert_eq!(
            response.headers()["x-request-id"],
            verdict.request_id.to_string().as_str()
        );

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "Security validation failed");
        assert_eq!(json["code"], "SQL_INJECTION");
        assert_eq!(json["violations"][1], "XSS_DETECTED");
        assert_eq!(json["requestId"], verdict.request_id.to_string());
        assert!(json.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_internal_detail_is_rendered_when_present() {
        let verdict = Verdict::internal(Uuid::new_v4(), 0, Some("boom".to_string()));
        let response = verdict_response(&verdict);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "SECURITY_ERROR");
        assert_eq!(json["violations"][0], "INTERNAL_ERROR");
        assert_eq!(json["detail"], "boom");
    }

    #[test]
    fn test_hop_by_hop_headers_stripped() {
        let upstream = axum::http::Response::builder()
            .header("connection", "keep-alive")
            .header("x-data", "1")
            .body(Body::empty())
            .unwrap();
        let response = from_upstream(upstream);
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["x-data"], "1");
    }
}
