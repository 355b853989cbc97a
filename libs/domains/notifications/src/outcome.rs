//! Stage outcomes and the audit record each one produces.

use crate::audit::{AuditEvent, AuditKind};
use crate::messages::ChannelSummary;
use crate::models::{DeliveryStatus, ReasonCode};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// How a stage finished with a message. Failures that should be retried are
/// returned as errors instead.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Prepare stage handed `units` routing units to the route stage.
    Enqueued { units: usize },
    /// The notification does not exist in the requested scope.
    Unmapped { notification_id: String },
    /// The notification-level filter rejected the event.
    Filtered { notification_id: String },
    /// No channel or provider could take the message.
    Unroutable {
        reason: ReasonCode,
        summary: Vec<ChannelSummary>,
    },
    /// The recipient may not receive this message.
    Undeliverable { reason: ReasonCode, message: String },
    /// A provider accepted the message.
    Delivered {
        provider: String,
        channel: String,
        external_id: Option<String>,
        delivered_at: Option<DateTime<Utc>>,
        reference: Value,
        status_check_scheduled: bool,
    },
    /// Dry run: routing completed without contacting the provider.
    Simulated {
        provider: String,
        channel: String,
        dry_run_key: String,
    },
    /// A delivery-status poll finished.
    StatusRecorded {
        status: DeliveryStatus,
        retry_after: Option<DateTime<Utc>>,
    },
    /// Status checks are disabled for the configuration.
    StatusSkipped,
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Enqueued { .. } => "enqueued",
            StageOutcome::Unmapped { .. } => "unmapped",
            StageOutcome::Filtered { .. } => "filtered",
            StageOutcome::Unroutable { .. } => "unroutable",
            StageOutcome::Undeliverable { .. } => "undeliverable",
            StageOutcome::Delivered { .. } => "delivered",
            StageOutcome::Simulated { .. } => "simulated",
            StageOutcome::StatusRecorded { .. } => "status_recorded",
            StageOutcome::StatusSkipped => "status_skipped",
        }
    }

    /// Audit kind recorded when a stage stops with this outcome.
    pub fn audit_kind(&self) -> Option<AuditKind> {
        match self {
            StageOutcome::Enqueued { .. } => None,
            StageOutcome::Unmapped { .. } => Some(AuditKind::Unmapped),
            StageOutcome::Filtered { .. } => Some(AuditKind::Filtered),
            StageOutcome::Unroutable { .. } => Some(AuditKind::Unroutable),
            StageOutcome::Undeliverable { .. } => Some(AuditKind::Undeliverable),
            StageOutcome::Delivered { .. } => Some(AuditKind::Sent),
            StageOutcome::Simulated { .. } => Some(AuditKind::Simulated),
            StageOutcome::StatusRecorded { status, .. } => match status {
                DeliveryStatus::Delivered | DeliveryStatus::Undeliverable => {
                    Some(AuditKind::DeliveryStatus)
                }
                DeliveryStatus::Sent | DeliveryStatus::SentNoRetry => None,
            },
            StageOutcome::StatusSkipped => None,
        }
    }

    pub fn audit_event(&self, tenant_id: &str, message_id: &str) -> Option<AuditEvent> {
        let kind = self.audit_kind()?;
        let event = AuditEvent::new(kind, tenant_id, message_id);
        let event = match self {
            StageOutcome::Unmapped { notification_id } => event
                .with_message("Notification not found")
                .with_details(json!({ "notificationId": notification_id })),
            StageOutcome::Filtered { notification_id } => event
                .with_message("Notification filtered out by its conditional")
                .with_details(json!({ "notificationId": notification_id })),
            StageOutcome::Unroutable { reason, summary } => event
                .with_reason(*reason)
                .with_details(json!({ "channelsSummary": summary })),
            StageOutcome::Undeliverable { reason, message } => {
                event.with_reason(*reason).with_message(message.clone())
            }
            StageOutcome::Delivered {
                provider,
                channel,
                external_id,
                delivered_at,
                reference,
                ..
            } => event.with_details(json!({
                "provider": provider,
                "channel": channel,
                "externalId": external_id,
                "deliveredAt": delivered_at,
                "reference": reference,
            })),
            StageOutcome::Simulated {
                provider,
                channel,
                dry_run_key,
            } => event.with_details(json!({
                "provider": provider,
                "channel": channel,
                "dryRunKey": dry_run_key,
            })),
            StageOutcome::StatusRecorded { status, .. } => {
                event.with_details(json!({ "status": status }))
            }
            StageOutcome::Enqueued { .. } | StageOutcome::StatusSkipped => event,
        };
        Some(event)
    }
}
