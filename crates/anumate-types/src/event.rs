//! CloudEvents 1.0 envelope and reserved subjects
//!
//! Every observable state change publishes a CloudEvent carrying the tenant,
//! correlation ID and plan hash so consumers can stitch executions together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TenantId;

/// CloudEvents 1.0 envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    /// Unique event ID
    pub id: String,
    /// Producing service, e.g. `anumate-orchestrator`
    pub source: String,
    /// Spec version, always `1.0`
    pub specversion: String,
    /// Event type, e.g. `com.anumate.execution.completed`
    #[serde(rename = "type")]
    pub event_type: String,
    /// When the event occurred
    pub time: DateTime<Utc>,
    /// Owning tenant (CloudEvents extension attribute)
    pub tenantid: TenantId,
    /// Bus subject the event was published on
    pub subject: Option<String>,
    /// Event-specific payload
    pub data: serde_json::Value,
}

impl CloudEvent {
    /// Build an event with a fresh ID and the current time
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        tenantid: TenantId,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            specversion: "1.0".to_string(),
            event_type: event_type.into(),
            time: Utc::now(),
            tenantid,
            subject: None,
            data,
        }
    }

    /// Attach the bus subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Reserved subject hierarchy
pub mod subjects {
    pub const CAPSULE_PREFIX: &str = "events.capsule";
    pub const PLAN_COMPILED: &str = "events.plan.compiled";
    pub const PREFLIGHT_COMPLETED: &str = "events.preflight.completed";
    pub const APPROVAL_REQUESTED: &str = "events.approval.requested";
    pub const APPROVAL_GRANTED: &str = "events.approval.granted";
    pub const APPROVAL_REJECTED: &str = "events.approval.rejected";
    pub const EXECUTION_STARTED: &str = "events.execution.started";
    pub const EXECUTION_COMPLETED: &str = "events.execution.completed";
    pub const EXECUTION_FAILED: &str = "events.execution.failed";
    pub const EXECUTION_CANCELLED: &str = "events.execution.cancelled";
    pub const AUDIT_PREFIX: &str = "events.audit";

    /// Whether a subject matches a pattern where a trailing `*` wildcards
    /// one or more segments, e.g. `events.execution.*`.
    pub fn matches(pattern: &str, subject: &str) -> bool {
        match pattern.strip_suffix(".*") {
            Some(prefix) => {
                subject.starts_with(prefix)
                    && subject.len() > prefix.len()
                    && subject.as_bytes()[prefix.len()] == b'.'
            }
            None => pattern == subject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_defaults() {
        let tenant = TenantId::new();
        let event = CloudEvent::new(
            "anumate-orchestrator",
            "com.anumate.execution.started",
            tenant,
            serde_json::json!({"run_id": "r1"}),
        );
        assert_eq!(event.specversion, "1.0");
        assert_eq!(event.tenantid, tenant);
        assert!(Uuid::parse_str(&event.id).is_ok());
    }

    #[test]
    fn test_subject_matching() {
        assert!(subjects::matches("events.execution.*", "events.execution.started"));
        assert!(subjects::matches(
            "events.execution.started",
            "events.execution.started"
        ));
        assert!(!subjects::matches("events.execution.*", "events.approval.granted"));
        assert!(!subjects::matches("events.execution.*", "events.execution"));
    }

    #[test]
    fn test_type_field_serializes_as_type() {
        let event = CloudEvent::new("s", "t", TenantId::new(), serde_json::Value::Null);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("type").is_some());
        assert!(json.get("event_type").is_none());
    }
}
