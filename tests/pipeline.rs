//! In-process tests of the full router: security middleware, handlers and
//! response decoration.

use std::sync::Arc;

use api_shield::config::ShieldConfig;
use api_shield::http::{build_router, AppState};
use api_shield::security::{ChannelAuditSink, SecurityEvent};
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

fn shield() -> (Router, mpsc::UnboundedReceiver<SecurityEvent>) {
    let mut config = ShieldConfig::default();
    config.observability.metrics_enabled = false;
    let (sink, events) = ChannelAuditSink::new();
    let state = AppState::new(&config, Arc::new(sink));
    (build_router(&config, state), events)
}

fn get(uri: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header("user-agent", "Mozilla/5.0")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, ip: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", ip)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn nested(levels: usize) -> String {
    let mut body = "1".to_string();
    for _ in 0..levels {
        body = format!("{{\"a\":{body}}}");
    }
    body
}

#[tokio::test]
async fn test_clean_request_is_decorated() {
    let (router, _) = shield();
    let response = router.oneshot(get("/health", "203.0.113.1")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["x-security-status"], "VALIDATED");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["x-ratelimit-limit"], "30");
    assert_eq!(headers["x-ratelimit-remaining"], "29");
    assert!(headers.get("retry-after").is_none());
    assert!(headers.get("strict-transport-security").is_none());
}

#[tokio::test]
async fn test_suspicious_parameter_combination() {
    let (router, mut events) = shield();
    let response = router
        .oneshot(get(
            "/api/v1/companies?fiscal_year=2024&name_filter=Toyota",
            "203.0.113.2",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()["x-security-violation"],
        "SUSPICIOUS_PARAMETER_COMBINATION"
    );
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();

    let body = json(response).await;
    assert_eq!(body["error"], "Security validation failed");
    assert_eq!(body["code"], "SUSPICIOUS_PARAMETER_COMBINATION");
    assert_eq!(body["requestId"], request_id);

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, "VALIDATION_ERROR");
    assert_eq!(event.details.endpoint, "/api/v1/companies");
    assert_eq!(event.details.client_ip, "203.0.113.2");
    assert_eq!(event.request_id.to_string(), request_id);
}

#[tokio::test]
async fn test_limit_lifts_combination_rule() {
    let (router, mut events) = shield();
    let response = router
        .oneshot(get(
            "/api/v1/companies?fiscal_year=2024&name_filter=Toyota&limit=50",
            "203.0.113.3",
        ))
        .await
        .unwrap();

    // Validation passed; no upstream is configured.
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["x-security-status"], "VALIDATED");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_sql_injection_in_query_is_audited_as_injection() {
    let (router, mut events) = shield();
    let response = router
        .oneshot(get(
            "/api/v1/companies?name_filter=%27%20OR%20%271%27%3D%271&limit=10",
            "203.0.113.4",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert_eq!(body["code"], "SQL_INJECTION");

    let event = events.try_recv().unwrap();
    assert_eq!(event.event_type, "INJECTION_ATTEMPT");
}

#[tokio::test]
async fn test_json_body_checks() {
    let (router, _) = shield();

    let response = router
        .clone()
        .oneshot(post_json("/api/v1/query", "203.0.113.5", nested(11)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "EXCESSIVE_NESTING");

    let response = router
        .clone()
        .oneshot(post_json("/api/v1/query", "203.0.113.5", "{not json"))
        .await
        .unwrap();
    assert_eq!(json(response).await["code"], "INVALID_JSON_BODY");

    let response = router
        .oneshot(post_json(
            "/api/v1/query",
            "203.0.113.5",
            r#"{"filter":{"$where":"sleep(1)"}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(json(response).await["code"], "NOSQL_INJECTION_OPERATOR");
}

#[tokio::test]
async fn test_ten_levels_of_nesting_pass() {
    let (router, _) = shield();
    let response = router
        .oneshot(post_json("/api/v1/query", "203.0.113.6", nested(10)))
        .await
        .unwrap();
    assert_eq!(response.headers()["x-security-status"], "VALIDATED");
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let (router, _) = shield();
    let request = Request::builder()
        .method("POST")
        .uri("/upload")
        .header("x-forwarded-for", "203.0.113.7")
        .header("content-type", "text/plain")
        .body(Body::from(vec![b'a'; 1024 * 1024 + 1]))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["code"], "BODY_TOO_LARGE");
}

#[tokio::test]
async fn test_scanner_user_agent_rejected() {
    let (router, _) = shield();
    let request = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "203.0.113.8")
        .header("user-agent", "sqlmap/1.7.2#stable")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-security-violation"], "SUSPICIOUS_USER_AGENT");
}

#[tokio::test]
async fn test_volume_limit_for_anonymous_clients() {
    let (router, _) = shield();

    for i in 0..30 {
        let response = router
            .clone()
            .oneshot(get("/health", "203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i}");
    }

    let response = router
        .clone()
        .oneshot(get("/health", "203.0.113.9"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert!(response.headers().contains_key("retry-after"));
    assert_eq!(json(response).await["code"], "RATE_LIMIT_EXCEEDED");

    // A different client is unaffected.
    let response = router.oneshot(get("/health", "203.0.113.10")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_clients_get_higher_limit() {
    let (router, _) = shield();
    let request = Request::builder()
        .uri("/health")
        .header("x-forwarded-for", "203.0.113.11")
        .header("x-api-key", "key-abc")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-ratelimit-limit"], "60");
}

#[tokio::test]
async fn test_violation_budget_blocks_client() {
    let (router, _) = shield();
    let bad = "/api/v1/companies?fiscal_year=abcd";

    for _ in 0..10 {
        let response = router.clone().oneshot(get(bad, "203.0.113.12")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let response = router
        .clone()
        .oneshot(get("/health", "203.0.113.12"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json(response).await;
    assert_eq!(body["code"], "RATE_LIMIT_SECURITY");
    assert_eq!(body["violations"][0], "EXCESSIVE_VIOLATIONS");
}

#[tokio::test]
async fn test_preflight_from_allowed_origin() {
    let (router, _) = shield();
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/api/v1/companies")
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "GET")
        .body(Body::empty())
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}

#[tokio::test]
async fn test_cors_headers_only_for_allowed_origin() {
    let (router, _) = shield();

    let mut request = get("/health", "203.0.113.13");
    request
        .headers_mut()
        .insert("origin", "https://evil.com".parse().unwrap());
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("access-control-allow-origin").is_none());

    let mut request = get("/health", "203.0.113.13");
    request
        .headers_mut()
        .insert("origin", "http://localhost:3000".parse().unwrap());
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );
}

#[tokio::test]
async fn test_safe_redirects() {
    let (router, _) = shield();

    let cases = [
        ("/redirect?to=%2Fdashboard%2Fsettings", "/dashboard/settings"),
        ("/redirect?to=%2F%2Fevil.com%2Fx", "/dashboard"),
        ("/redirect?to=javascript%3Aalert(1)", "/dashboard"),
        ("/redirect?to=https%3A%2F%2Fevil.com%2F", "/dashboard"),
        ("/redirect", "/dashboard"),
    ];

    for (uri, expected) in cases {
        let response = router
            .clone()
            .oneshot(get(uri, "203.0.113.14"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND, "{uri}");
        assert_eq!(response.headers()["location"], expected, "{uri}");
    }
}
