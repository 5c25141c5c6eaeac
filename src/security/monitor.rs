//! Threat monitoring over the audit stream.
//!
//! # Responsibilities
//! - Keep one hour of security events per client IP and per endpoint
//! - Raise alerts when an IP or an endpoint crosses its threshold
//! - Summarize recent events and assess the overall threat level
//!
//! # Design Decisions
//! - Fed by `MonitorAuditSink`, which wraps whatever sink the server uses
//! - Every window is bounded in length and in age
//! - An alert with the same level and message is raised at most once per
//!   five minutes

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::security::audit::{AuditError, AuditSink, SecurityEvent};
use crate::security::rate_limit::now_ms;
use crate::security::types::{Severity, ViolationCode};

/// Length of the monitoring window.
pub const MONITOR_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Events kept in the global history.
pub const MAX_EVENTS: usize = 10_000;

/// Events kept per IP or per endpoint.
pub const MAX_EVENTS_PER_KEY: usize = 1_000;

/// Critical events from one IP that raise a critical alert.
pub const CRITICAL_ALERT_THRESHOLD: usize = 5;

/// High events from one IP that raise a high alert.
pub const HIGH_ALERT_THRESHOLD: usize = 10;

/// Events on one endpoint above which a flood alert is raised.
pub const ENDPOINT_ALERT_THRESHOLD: usize = 50;

/// Events from one IP that mark it as suspicious.
pub const SUSPICIOUS_IP_THRESHOLD: usize = 10;

/// Events on one endpoint that mark it as affected.
pub const AFFECTED_ENDPOINT_THRESHOLD: usize = 20;

/// Quiet period for a repeated alert.
pub const ALERT_DEDUP_MS: u64 = 5 * 60 * 1000;

const MAX_RECENT_ALERTS: usize = 100;

#[derive(Debug, Clone)]
struct Record {
    at_ms: u64,
    level: Severity,
    client_ip: String,
    endpoint: String,
    violations: Vec<ViolationCode>,
}

impl Record {
    fn has(&self, code: ViolationCode) -> bool {
        self.violations.contains(&code)
    }

    fn is_rate_limit(&self) -> bool {
        self.violations.iter().any(|v| {
            matches!(
                v,
                ViolationCode::RateLimitSecurity
                    | ViolationCode::ExcessiveViolations
                    | ViolationCode::RateLimitExceeded
            )
        })
    }
}

/// An alert raised by the monitor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAlert {
    pub level: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub event_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_ips: Option<usize>,
    pub recent_violations: Vec<ViolationCode>,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationCount {
    pub violation: ViolationCode,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Aggregates over a recent time range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityMetrics {
    pub total_events: usize,
    pub critical_events: usize,
    pub high_events: usize,
    pub medium_events: usize,
    pub low_events: usize,
    pub path_injection_attempts: usize,
    pub sql_injection_attempts: usize,
    pub xss_attempts: usize,
    pub rate_limit_exceeded: usize,
    pub unique_ips: usize,
    pub top_violations: Vec<ViolationCount>,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

/// Overall threat picture for the last monitoring window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatAssessment {
    pub threat_level: ThreatLevel,
    pub indicators: Vec<String>,
    pub recommendations: Vec<String>,
    pub affected_endpoints: Vec<String>,
    pub suspicious_ips: Vec<String>,
    pub recent_alerts: Vec<ThreatAlert>,
}

fn to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_default()
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    queue.push_back(item);
    while queue.len() > max {
        queue.pop_front();
    }
}

fn prune(queue: &mut VecDeque<Arc<Record>>, cutoff_ms: u64) {
    while queue.front().is_some_and(|r| r.at_ms <= cutoff_ms) {
        queue.pop_front();
    }
}

fn recent(
    windows: &DashMap<String, VecDeque<Arc<Record>>>,
    key: &str,
    since_ms: u64,
) -> Vec<Arc<Record>> {
    windows
        .get(key)
        .map(|queue| {
            queue
                .iter()
                .filter(|r| r.at_ms > since_ms)
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn keys_at_least(
    windows: &DashMap<String, VecDeque<Arc<Record>>>,
    since_ms: u64,
    threshold: usize,
) -> Vec<String> {
    let mut keys: Vec<String> = windows
        .iter()
        .filter(|entry| entry.value().iter().filter(|r| r.at_ms > since_ms).count() >= threshold)
        .map(|entry| entry.key().clone())
        .collect();
    keys.sort();
    keys
}

/// In-process security event monitor.
#[derive(Debug, Default)]
pub struct SecurityMonitor {
    events: Mutex<VecDeque<Arc<Record>>>,
    by_ip: DashMap<String, VecDeque<Arc<Record>>>,
    by_endpoint: DashMap<String, VecDeque<Arc<Record>>>,
    alerts_sent: DashMap<String, u64>,
    alerts: Mutex<VecDeque<ThreatAlert>>,
    last_sweep_ms: AtomicU64,
}

impl SecurityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event now. Returns the alerts it raised.
    pub fn record(&self, event: &SecurityEvent) -> Vec<ThreatAlert> {
        self.record_at(event, now_ms())
    }

    pub fn record_at(&self, event: &SecurityEvent, now_ms: u64) -> Vec<ThreatAlert> {
        let record = Arc::new(Record {
            at_ms: now_ms,
            level: event.level,
            client_ip: event.details.client_ip.clone(),
            endpoint: event.details.endpoint.clone(),
            violations: event.details.violations.clone(),
        });
        let cutoff = now_ms.saturating_sub(MONITOR_WINDOW_MS * 2);

        if let Ok(mut events) = self.events.lock() {
            prune(&mut *events, cutoff);
            push_bounded(&mut *events, record.clone(), MAX_EVENTS);
        }

        for (windows, key) in [
            (&self.by_ip, &record.client_ip),
            (&self.by_endpoint, &record.endpoint),
        ] {
            let mut queue = windows.entry(key.clone()).or_default();
            prune(&mut *queue, cutoff);
            push_bounded(&mut *queue, record.clone(), MAX_EVENTS_PER_KEY);
        }

        let alerts = self.evaluate(&record, now_ms);
        self.maybe_sweep(now_ms);
        alerts
    }

    fn evaluate(&self, record: &Record, now_ms: u64) -> Vec<ThreatAlert> {
        let since = now_ms.saturating_sub(MONITOR_WINDOW_MS);
        let mut alerts = Vec::new();

        let ip_events = recent(&self.by_ip, &record.client_ip, since);
        let critical = ip_events.iter().filter(|r| r.level == Severity::Critical).count();
        let high = ip_events.iter().filter(|r| r.level == Severity::High).count();
        let ip_alert = if critical >= CRITICAL_ALERT_THRESHOLD {
            Some((Severity::Critical, critical))
        } else if high >= HIGH_ALERT_THRESHOLD {
            Some((Severity::High, high))
        } else {
            None
        };
        if let Some((level, count)) = ip_alert {
            let alert = ThreatAlert {
                level,
                message: format!(
                    "{} security threat detected from IP {}",
                    if level == Severity::Critical { "Critical" } else { "High" },
                    record.client_ip
                ),
                client_ip: Some(record.client_ip.clone()),
                endpoint: None,
                event_count: count,
                unique_ips: None,
                recent_violations: ip_events
                    .iter()
                    .flat_map(|r| r.violations.iter().copied())
                    .collect(),
                raised_at: to_datetime(now_ms),
            };
            alerts.extend(self.raise(alert, now_ms));
        }

        let endpoint_events = recent(&self.by_endpoint, &record.endpoint, since);
        if endpoint_events.len() > ENDPOINT_ALERT_THRESHOLD {
            let unique: HashSet<&str> = endpoint_events.iter().map(|r| r.client_ip.as_str()).collect();
            let alert = ThreatAlert {
                level: Severity::High,
                message: format!("Potential flood on endpoint {}", record.endpoint),
                client_ip: None,
                endpoint: Some(record.endpoint.clone()),
                event_count: endpoint_events.len(),
                unique_ips: Some(unique.len()),
                recent_violations: Vec::new(),
                raised_at: to_datetime(now_ms),
            };
            alerts.extend(self.raise(alert, now_ms));
        }

        alerts
    }

    fn raise(&self, alert: ThreatAlert, now_ms: u64) -> Option<ThreatAlert> {
        let key = format!("{:?}:{}", alert.level, alert.message);
        let mut last_sent = self.alerts_sent.entry(key).or_insert(0);
        if *last_sent != 0 && now_ms.saturating_sub(*last_sent) < ALERT_DEDUP_MS {
            return None;
        }
        *last_sent = now_ms;
        drop(last_sent);

        tracing::error!(
            target: "security_alert",
            level = ?alert.level,
            client = alert.client_ip.as_deref().unwrap_or("-"),
            endpoint = alert.endpoint.as_deref().unwrap_or("-"),
            events = alert.event_count,
            "{}",
            alert.message
        );

        if let Ok(mut alerts) = self.alerts.lock() {
            push_bounded(&mut *alerts, alert.clone(), MAX_RECENT_ALERTS);
        }
        Some(alert)
    }

    /// Drop empty windows and stale dedup entries once per monitoring window.
    fn maybe_sweep(&self, now_ms: u64) {
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) < MONITOR_WINDOW_MS {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let cutoff = now_ms.saturating_sub(MONITOR_WINDOW_MS * 2);
        for windows in [&self.by_ip, &self.by_endpoint] {
            windows.retain(|_, queue| {
                prune(queue, cutoff);
                !queue.is_empty()
            });
        }
        self.alerts_sent.retain(|_, sent| *sent > cutoff);
    }

    /// Aggregates over the last `range_ms`.
    pub fn metrics(&self, range_ms: u64) -> SecurityMetrics {
        self.metrics_at(now_ms(), range_ms)
    }

    pub fn metrics_at(&self, now_ms: u64, range_ms: u64) -> SecurityMetrics {
        let start = now_ms.saturating_sub(range_ms);
        let relevant: Vec<Arc<Record>> = self
            .events
            .lock()
            .map(|events| events.iter().filter(|r| r.at_ms > start).cloned().collect())
            .unwrap_or_default();

        let level = |severity: Severity| relevant.iter().filter(|r| r.level == severity).count();
        let with = |code: ViolationCode| relevant.iter().filter(|r| r.has(code)).count();

        let mut counts: HashMap<ViolationCode, usize> = HashMap::new();
        for code in relevant.iter().flat_map(|r| r.violations.iter()) {
            *counts.entry(*code).or_default() += 1;
        }
        let mut top_violations: Vec<ViolationCount> = counts
            .into_iter()
            .map(|(violation, count)| ViolationCount { violation, count })
            .collect();
        top_violations.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.violation.as_str().cmp(b.violation.as_str()))
        });
        top_violations.truncate(10);

        let unique_ips: HashSet<&str> = relevant.iter().map(|r| r.client_ip.as_str()).collect();

        SecurityMetrics {
            total_events: relevant.len(),
            critical_events: level(Severity::Critical),
            high_events: level(Severity::High),
            medium_events: level(Severity::Medium),
            low_events: level(Severity::Low),
            path_injection_attempts: with(ViolationCode::PathInjection),
            sql_injection_attempts: with(ViolationCode::SqlInjection),
            xss_attempts: with(ViolationCode::XssDetected),
            rate_limit_exceeded: relevant.iter().filter(|r| r.is_rate_limit()).count(),
            unique_ips: unique_ips.len(),
            top_violations,
            time_range: TimeRange {
                start: to_datetime(start),
                end: to_datetime(now_ms),
            },
        }
    }

    /// Threat level, indicators and hot spots for the last monitoring window.
    pub fn assess(&self) -> ThreatAssessment {
        self.assess_at(now_ms())
    }

    pub fn assess_at(&self, now_ms: u64) -> ThreatAssessment {
        let metrics = self.metrics_at(now_ms, MONITOR_WINDOW_MS);
        let since = now_ms.saturating_sub(MONITOR_WINDOW_MS);
        let mut indicators = Vec::new();
        let mut recommendations = Vec::new();

        let threat_level = if metrics.critical_events > 0 {
            indicators.push(format!(
                "{} critical security events detected",
                metrics.critical_events
            ));
            recommendations.push("Immediate investigation required".to_string());
            recommendations.push("Consider blocking suspicious IPs".to_string());
            ThreatLevel::Critical
        } else if metrics.high_events > 5 {
            indicators.push(format!("{} high severity events detected", metrics.high_events));
            recommendations.push("Review security logs".to_string());
            recommendations.push("Increase monitoring".to_string());
            ThreatLevel::High
        } else if metrics.medium_events > 10 {
            indicators.push(format!(
                "{} medium severity events detected",
                metrics.medium_events
            ));
            recommendations.push("Monitor for escalation".to_string());
            ThreatLevel::Medium
        } else if metrics.total_events > 50 {
            indicators.push("Elevated security event activity".to_string());
            recommendations.push("Continue monitoring".to_string());
            ThreatLevel::Low
        } else {
            ThreatLevel::None
        };

        if metrics.path_injection_attempts > 0 {
            indicators.push(format!(
                "{} path injection attempts",
                metrics.path_injection_attempts
            ));
            recommendations.push("Review path validation logic".to_string());
        }
        if metrics.sql_injection_attempts > 0 {
            indicators.push(format!(
                "{} SQL injection attempts",
                metrics.sql_injection_attempts
            ));
            recommendations.push("Verify query parameterization".to_string());
        }
        if metrics.xss_attempts > 0 {
            indicators.push(format!("{} XSS attempts", metrics.xss_attempts));
            recommendations.push("Check output encoding".to_string());
        }

        let recent_alerts = self
            .alerts
            .lock()
            .map(|alerts| alerts.iter().cloned().collect())
            .unwrap_or_default();

        ThreatAssessment {
            threat_level,
            indicators,
            recommendations,
            affected_endpoints: keys_at_least(&self.by_endpoint, since, AFFECTED_ENDPOINT_THRESHOLD),
            suspicious_ips: keys_at_least(&self.by_ip, since, SUSPICIOUS_IP_THRESHOLD),
            recent_alerts,
        }
    }
}

/// Feeds every event to a `SecurityMonitor`, then to the wrapped sink.
pub struct MonitorAuditSink {
    monitor: Arc<SecurityMonitor>,
    inner: Arc<dyn AuditSink>,
}

impl MonitorAuditSink {
    pub fn new(monitor: Arc<SecurityMonitor>, inner: Arc<dyn AuditSink>) -> Self {
        Self { monitor, inner }
    }
}

impl AuditSink for MonitorAuditSink {
    fn emit(&self, event: &SecurityEvent) -> Result<(), AuditError> {
        self.monitor.record(event);
        self.inner.emit(event)
    }
}
