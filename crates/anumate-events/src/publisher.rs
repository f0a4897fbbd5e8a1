//! Typed event publisher
//!
//! Components publish through this facade so that every event carries the
//! CloudEvents envelope and passes the central redaction step. The sink
//! trait keeps publishers testable without a full bus.

use std::sync::Arc;

use async_trait::async_trait;

use anumate_types::{CloudEvent, TenantId};

use crate::{EventBus, EventBusResult, Redactor};

/// Where published events go
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        subject: &str,
        partition_key: Option<String>,
        event: CloudEvent,
    ) -> EventBusResult<()>;
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(
        &self,
        subject: &str,
        partition_key: Option<String>,
        event: CloudEvent,
    ) -> EventBusResult<()> {
        EventBus::publish(self, subject, partition_key, event).await
    }
}

/// Publisher bound to a source service name
pub struct EventPublisher {
    source: String,
    sink: Arc<dyn EventSink>,
    redactor: Redactor,
}

impl EventPublisher {
    pub fn new(source: impl Into<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            source: source.into(),
            sink,
            redactor: Redactor::new(),
        }
    }

    /// Build, redact and publish an event.
    ///
    /// `partition_key` should be the run id for execution events so that
    /// consumers observe per-run publish order.
    pub async fn publish(
        &self,
        subject: &str,
        event_type: &str,
        tenant_id: TenantId,
        partition_key: Option<String>,
        data: serde_json::Value,
    ) -> EventBusResult<()> {
        let data = self.redactor.redact(data);
        let event = CloudEvent::new(&self.source, event_type, tenant_id, data);
        tracing::debug!(subject = subject, event_type = event_type, "Publishing event");
        self.sink.publish(subject, partition_key, event).await
    }
}
