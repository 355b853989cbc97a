//! Audit trail.
//!
//! Every decision the pipeline makes about a message is recorded as an
//! [`AuditEvent`]. Downstream systems read the trail to explain why a message
//! was or was not delivered, so event kinds and their `details` shape are a
//! contract.

use crate::error::{NotificationError, NotificationResult};
use crate::models::ReasonCode;
use crate::streams::AuditStream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use stream_worker::StreamProducer;
use strum::{AsRefStr, Display};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum AuditKind {
    Unmapped,
    Filtered,
    Unroutable,
    Undeliverable,
    Routed,
    ProviderAttempt,
    Sent,
    Simulated,
    Error,
    DeliveryStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditKind,
    pub tenant_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, tenant_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            tenant_id: tenant_id.into(),
            message_id: message_id.into(),
            timestamp: Utc::now(),
            reason: None,
            message: None,
            details: Value::Null,
        }
    }

    pub fn with_reason(mut self, reason: ReasonCode) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> NotificationResult<()>;
}

/// Emit an event, logging instead of failing when the sink is unavailable.
pub async fn record(sink: &dyn AuditSink, event: AuditEvent) {
    let kind = event.kind;
    let message_id = event.message_id.clone();
    if let Err(e) = sink.emit(event).await {
        warn!(audit = %kind, message_id = %message_id, error = %e, "Failed to record audit event");
    }
}

/// Publishes events to the `notifications:audit` stream.
#[derive(Clone)]
pub struct StreamAuditSink {
    producer: StreamProducer,
}

impl StreamAuditSink {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            producer: StreamProducer::from_stream_def::<AuditStream>(redis),
        }
    }
}

#[async_trait]
impl AuditSink for StreamAuditSink {
    async fn emit(&self, event: AuditEvent) -> NotificationResult<()> {
        self.producer.send(&event).await?;
        Ok(())
    }
}

/// Mirrors every event into the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, event: AuditEvent) -> NotificationResult<()> {
        info!(
            audit = %event.kind,
            tenant_id = %event.tenant_id,
            message_id = %event.message_id,
            reason = ?event.reason,
            detail = event.message.as_deref().unwrap_or_default(),
            details = %event.details,
            "Audit event"
        );
        Ok(())
    }
}

/// Collects events in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<AuditKind> {
        self.events().iter().map(|e| e.kind).collect()
    }

    pub fn last(&self, kind: AuditKind) -> Option<AuditEvent> {
        self.events().into_iter().rev().find(|e| e.kind == kind)
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn emit(&self, event: AuditEvent) -> NotificationResult<()> {
        self.events
            .lock()
            .map_err(|e| NotificationError::Internal(e.to_string()))?
            .push(event);
        Ok(())
    }
}

/// Sends each event to every inner sink. One failing sink does not stop the
/// others; the first error is returned.
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn emit(&self, event: AuditEvent) -> NotificationResult<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.emit(event.clone()).await {
                warn!(audit = %event.kind, error = %e, "Audit sink failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
