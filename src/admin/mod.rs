//! Admin API.
//!
//! Read-only views of the shield's shared state, served on a separate
//! listener behind Bearer authentication.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

#[derive(Clone)]
pub struct AdminState {
    pub app: AppState,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(app: AppState, api_key: &str) -> Self {
        Self {
            app,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/violations", get(get_violations))
        .route("/admin/rate-limits", get(get_rate_limits))
        .route("/admin/threats", get(get_threats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShieldConfig;
    use crate::http::request::{BodyState, RequestDescriptor};
    use crate::security::audit::TracingAuditSink;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    fn router(key: &str) -> (Router, AppState) {
        let config = ShieldConfig::default();
        let app = AppState::new(&config, Arc::new(TracingAuditSink));
        (setup_admin_router(AdminState::new(app.clone(), key)), app)
    }

    fn admin_get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_admin_requires_bearer_key() {
        let (router, _) = router("secret");

        let response = router.clone().oneshot(admin_get("/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .clone()
            .oneshot(admin_get("/admin/status", Some("wrong")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router.oneshot(admin_get("/admin/status", Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_empty_key_locks_admin() {
        let (router, _) = router("");
        let response = router.oneshot(admin_get("/admin/status", Some(""))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_rate_limit_snapshot() {
        let (router, app) = router("secret");
        app.security.volume.check("ip:203.0.113.9", 30);

        let response = router
            .oneshot(admin_get("/admin/rate-limits", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json[0]["key"], "ip:203.0.113.9");
        assert_eq!(json[0]["count"], 1);
        assert_eq!(json[0]["blocked"], false);
    }

    #[tokio::test]
    async fn test_threat_report() {
        let (router, app) = router("secret");
        let response = router
            .clone()
            .oneshot(admin_get("/admin/threats", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let (parts, _) = Request::builder()
            .uri("/api/v1/companies?name_filter=%27%20OR%20%271%27%3D%271")
            .header("x-forwarded-for", "203.0.113.20")
            .body(())
            .unwrap()
            .into_parts();
        for _ in 0..10 {
            let request =
                RequestDescriptor::from_parts(Uuid::new_v4(), &parts, BodyState::Empty, None);
            let verdict = app.security.validator.validate_request(&request, "/api/v1/companies");
            assert!(!verdict.valid);
        }

        let response = router
            .oneshot(admin_get("/admin/threats", Some("secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["threatLevel"], "HIGH");
        assert_eq!(json["suspiciousIps"][0], "203.0.113.20");
        assert_eq!(json["recentAlerts"][0]["level"], "HIGH");
        assert_eq!(json["metrics"]["sqlInjectionAttempts"], 10);
    }
}
