use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::config::Environment;
use crate::security::monitor::{SecurityMetrics, ThreatAssessment, MONITOR_WINDOW_MS};
use crate::security::rate_limit::{now_ms, Window};

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub environment: Environment,
    pub rate_limit_enabled: bool,
    pub tracked_clients: usize,
    pub tracked_violators: usize,
}

#[derive(Debug, Serialize)]
pub struct WindowEntry {
    pub key: String,
    pub count: u32,
    pub window_start_ms: u64,
    pub window_age_ms: u64,
    pub blocked: bool,
}

#[derive(Debug, Serialize)]
pub struct ThreatReport {
    #[serde(flatten)]
    pub assessment: ThreatAssessment,
    pub metrics: SecurityMetrics,
}

fn entries(snapshot: Vec<(String, Window)>) -> Vec<WindowEntry> {
    let now = now_ms();
    snapshot
        .into_iter()
        .map(|(key, window)| WindowEntry {
            key,
            count: window.count,
            window_start_ms: window.window_start_ms,
            window_age_ms: now.saturating_sub(window.window_start_ms),
            blocked: window.blocked,
        })
        .collect()
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let security = &state.app.security;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        environment: security.policy.load().environment,
        rate_limit_enabled: security.rate_limit_enabled,
        tracked_clients: security.volume.store().len(),
        tracked_violators: security.validator.budget().snapshot().len(),
    })
}

pub async fn get_violations(State(state): State<AdminState>) -> Json<Vec<WindowEntry>> {
    Json(entries(state.app.security.validator.budget().snapshot()))
}

pub async fn get_rate_limits(State(state): State<AdminState>) -> Json<Vec<WindowEntry>> {
    Json(entries(state.app.security.volume.store().snapshot()))
}

pub async fn get_threats(State(state): State<AdminState>) -> Json<ThreatReport> {
    let monitor = &state.app.security.monitor;
    Json(ThreatReport {
        assessment: monitor.assess(),
        metrics: monitor.metrics(MONITOR_WINDOW_MS),
    })
}
