//! Security audit events.
//!
//! Events are append-only and never read back by the pipeline. Sinks must not
//! block; delivery failures are reported to the caller, which drops them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::security::types::{Severity, ViolationCode};

/// One rejected request, as recorded for auditing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_type: &'static str,
    pub level: Severity,
    pub details: EventDetails,
    pub timestamp: DateTime<Utc>,
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub endpoint: String,
    pub violations: Vec<ViolationCode>,
    pub client_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl SecurityEvent {
    /// Build an event classified by the most severe violation.
    pub fn from_violations(request_id: Uuid, details: EventDetails) -> Self {
        let level = Severity::classify(&details.violations);
        Self {
            event_type: level.event_type(),
            level,
            details,
            timestamp: Utc::now(),
            request_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit channel closed")]
    ChannelClosed,

    #[error("failed to encode audit event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for security events.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &SecurityEvent) -> Result<(), AuditError>;
}

/// Writes events to the `security_audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: &SecurityEvent) -> Result<(), AuditError> {
        let violations = serde_json::to_string(&event.details.violations)?;
        match event.level {
            Severity::High | Severity::Critical => tracing::error!(
                target: "security_audit",
                request_id = %event.request_id,
                event_type = event.event_type,
                level = ?event.level,
                endpoint = %event.details.endpoint,
                client = %event.details.client_ip,
                user_agent = event.details.user_agent.as_deref().unwrap_or("unknown"),
                violations = %violations,
                "Security violation"
            ),
            Severity::Medium | Severity::Low => tracing::warn!(
                target: "security_audit",
                request_id = %event.request_id,
                event_type = event.event_type,
                level = ?event.level,
                endpoint = %event.details.endpoint,
                client = %event.details.client_ip,
                violations = %violations,
                "Security violation"
            ),
        }
        Ok(())
    }
}

/// Forwards events onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<SecurityEvent>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver that observes its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SecurityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: &SecurityEvent) -> Result<(), AuditError> {
        self.tx
            .send(event.clone())
            .map_err(|_| AuditError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(violations: Vec<ViolationCode>) -> EventDetails {
        EventDetails {
            endpoint: "/api/v1/companies".to_string(),
            violations,
            client_ip: "203.0.113.5".to_string(),
            user_agent: None,
        }
    }

    #[test]
    fn test_event_classification() {
        let event = SecurityEvent::from_violations(
            Uuid::new_v4(),
            details(vec![ViolationCode::InvalidNumber, ViolationCode::PathInjection]),
        );
        assert_eq!(event.level, Severity::High);
        assert_eq!(event.event_type, "INJECTION_ATTEMPT");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "HIGH");
        assert_eq!(json["details"]["clientIp"], "203.0.113.5");
        assert_eq!(json["details"]["violations"][1], "PATH_INJECTION");
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_and_reports_closure() {
        let (sink, mut rx) = ChannelAuditSink::new();
        let event =
            SecurityEvent::from_violations(Uuid::new_v4(), details(vec![ViolationCode::XssDetected]));

        sink.emit(&event).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "XSS_ATTEMPT");

        drop(rx);
        assert!(matches!(sink.emit(&event), Err(AuditError::ChannelClosed)));
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        let event =
            SecurityEvent::from_violations(Uuid::new_v4(), details(vec![ViolationCode::InvalidCursor]));
        assert!(TracingAuditSink.emit(&event).is_ok());
    }
}
