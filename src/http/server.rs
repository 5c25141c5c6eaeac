//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the health, redirect and forwarding handlers
//! - Wire up middleware (security pipeline, timeout, concurrency limit, tracing)
//! - Forward validated requests to the configured data backend
//! - Apply configuration reloads to the shared policy
//! - Serve until the shutdown coordinator fires
//!
//! # Design Decisions
//! - The security middleware wraps every route, including `/health`
//! - Only the policy and the upstream address hot-reload; listener and
//!   timeout changes need a restart

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        header,
        uri::{Authority, PathAndQuery, Scheme},
        HeaderMap, HeaderValue, Request, StatusCode, Uri,
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::config::{PolicyConfig, ShieldConfig, UpstreamConfig};
use crate::http::request::RequestIdExt;
use crate::http::response::{from_upstream, gateway_error};
use crate::security::audit::AuditSink;
use crate::security::middleware::{security_middleware, SecurityState};
use crate::security::redirect::RedirectValidator;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub security: SecurityState,
    pub upstream: Arc<ArcSwap<UpstreamConfig>>,
    pub client: Client<HttpConnector, Body>,
}

impl AppState {
    pub fn new(config: &ShieldConfig, audit: Arc<dyn AuditSink>) -> Self {
        let policy = Arc::new(ArcSwap::from_pointee(config.policy.clone()));
        let security = SecurityState::new(policy, config.rate_limit.enabled, audit);
        Self::with_security(config, security)
    }

    /// State around an existing security layer, e.g. one with injected stores.
    pub fn with_security(config: &ShieldConfig, security: SecurityState) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.timeouts.idle_secs))
            .build(connector);

        Self {
            security,
            upstream: Arc::new(ArcSwap::from_pointee(config.upstream.clone())),
            client,
        }
    }

    /// Swap in the reloadable parts of a new configuration.
    pub fn apply(&self, config: &ShieldConfig) {
        self.security.policy.store(Arc::new(config.policy.clone()));
        self.upstream.store(Arc::new(config.upstream.clone()));
    }
}

/// HTTP server for the shield.
pub struct HttpServer {
    router: Router,
    state: AppState,
    config: ShieldConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ShieldConfig, audit: Arc<dyn AuditSink>) -> Self {
        let state = AppState::new(&config, audit);
        Self::with_state(config, state)
    }

    pub fn with_state(config: ShieldConfig, state: AppState) -> Self {
        let router = build_router(&config, state.clone());
        Self {
            router,
            state,
            config,
        }
    }

    /// Shared state, for the admin API.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<ShieldConfig>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = ?self.config.policy.environment,
            upstream = self.config.upstream.address.as_deref().unwrap_or("none"),
            "HTTP server starting"
        );

        if let Some(mut updates) = config_updates {
            let state = self.state.clone();
            tokio::spawn(async move {
                while let Some(config) = updates.recv().await {
                    state.apply(&config);
                    tracing::info!(
                        environment = ?config.policy.environment,
                        "Security policy reloaded"
                    );
                }
            });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &ShieldConfig, state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/redirect", get(redirect_handler))
        .fallback(forward_handler)
        .layer(middleware::from_fn_with_state(
            state.security.clone(),
            security_middleware,
        ))
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
        .layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct RedirectQuery {
    to: Option<String>,
}

/// The URL the client is currently on, rebuilt from the Host header.
fn current_url(headers: &HeaderMap, policy: &PolicyConfig) -> String {
    let scheme = if policy.is_production() { "https" } else { "http" };
    match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        Some(host) => format!("{scheme}://{host}/"),
        None => policy
            .app_url
            .clone()
            .unwrap_or_else(|| "http://localhost/".to_string()),
    }
}

async fn redirect_handler(
    State(state): State<AppState>,
    Query(query): Query<RedirectQuery>,
    headers: HeaderMap,
) -> Response {
    let policy = state.security.policy.load();
    let current = current_url(&headers, &policy);
    let target = RedirectValidator::new(&policy).generate_safe_redirect_url(
        query.to.as_deref(),
        &policy.default_redirect,
        &current,
    );

    let location = HeaderValue::from_str(&target)
        .or_else(|_| HeaderValue::from_str(&policy.default_redirect))
        .unwrap_or_else(|_| HeaderValue::from_static("/"));

    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// Forward a validated request to the data backend.
async fn forward_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request.request_id().unwrap_or_else(Uuid::new_v4);
    let upstream = state.upstream.load();

    let Some(address) = upstream.address.as_deref() else {
        tracing::warn!(request_id = %request_id, "No upstream configured");
        return gateway_error(StatusCode::SERVICE_UNAVAILABLE, "No upstream configured", request_id);
    };

    let Ok(authority) = Authority::from_str(address) else {
        tracing::error!(request_id = %request_id, upstream = %address, "Invalid upstream address");
        return gateway_error(StatusCode::SERVICE_UNAVAILABLE, "No upstream configured", request_id);
    };

    let (mut parts, body) = request.into_parts();
    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(authority);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }

    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Failed to build upstream URI");
            return gateway_error(StatusCode::BAD_GATEWAY, "Upstream request failed", request_id);
        }
    };
    parts.headers.remove(header::HOST);

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        uri = %parts.uri,
        "Forwarding request"
    );

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => from_upstream(response),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            gateway_error(StatusCode::BAD_GATEWAY, "Upstream request failed", request_id)
        }
    }
}
