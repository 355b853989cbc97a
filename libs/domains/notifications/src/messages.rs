//! Stream payloads exchanged between pipeline stages.
//!
//! Inter-stage messages stay small: the routing unit carries only ids and a
//! [`MessageLocation`] pointing at the [`RoutingBundle`] holding the
//! notification, configurations and recipient data.

use crate::filter::Filter;
use crate::models::{Category, Configuration, Notification, Preferences, ReasonCode, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stream_worker::StreamJob;

/// Inbound trigger: one event occurrence for one recipient.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareJob {
    pub message_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    /// Notification (event) id to deliver.
    pub event_id: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub profile: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_profile: Option<Value>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<Value>,
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_key: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl StreamJob for PrepareJob {
    fn job_id(&self) -> String {
        self.message_id.clone()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry_count(&self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocationType {
    /// `path` is the bundle itself, serialized as JSON.
    Json,
    /// `path` is a key in the bundle store.
    S3,
}

/// Where a routing unit's bundle lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLocation {
    #[serde(rename = "type")]
    pub kind: LocationType,
    pub path: String,
}

impl MessageLocation {
    pub fn inline(json: String) -> Self {
        Self {
            kind: LocationType::Json,
            path: json,
        }
    }

    pub fn stored(path: String) -> Self {
        Self {
            kind: LocationType::S3,
            path,
        }
    }
}

/// One dispatchable slice of a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingUnit {
    pub message_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_key: Option<String>,
    pub message_location: MessageLocation,
}

impl StreamJob for RoutingUnit {
    fn job_id(&self) -> String {
        self.message_id.clone()
    }

    fn retry_count(&self) -> u32 {
        self.retry_count.unwrap_or(0)
    }

    fn with_retry_count(&self, retry_count: u32) -> Self {
        Self {
            retry_count: Some(retry_count),
            ..self.clone()
        }
    }
}

/// Everything the route stage needs for one unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingBundle {
    /// The unit's notification: `bestOf` holds its candidate channels.
    pub notification: Notification,
    #[serde(default)]
    pub configurations: Vec<Configuration>,
    #[serde(default)]
    pub profile: Value,
    /// Profile as supplied by the caller, before any enrichment.
    #[serde(default)]
    pub sent_profile: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_profile: Option<Value>,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<Value>,
    #[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub scope: Scope,
}

/// Follow-up poll of a polling provider after a send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCheckJob {
    pub message_id: String,
    pub tenant_id: String,
    pub provider: String,
    pub configuration_id: String,
    pub external_id: String,
    /// Channel kind the message went out on.
    pub channel: String,
    /// Scope the configuration was loaded from.
    #[serde(default)]
    pub scope: Scope,
    /// Number of polls already made.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub retry_count: u32,
}

impl StatusCheckJob {
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            retry_count: 0,
            ..self.clone()
        }
    }
}

impl StreamJob for StatusCheckJob {
    fn job_id(&self) -> String {
        format!("{}:{}", self.message_id, self.external_id)
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn with_retry_count(&self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self.clone()
        }
    }
}

/// One candidate channel considered by the route stage, in evaluation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSummary {
    /// Channel kind (`email`, `sms`, ...).
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub selected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Filter>,
}

impl ChannelSummary {
    pub fn selected(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            reason: None,
            selected: true,
            conditional: None,
        }
    }

    pub fn rejected(channel: impl Into<String>, reason: ReasonCode) -> Self {
        Self {
            channel: channel.into(),
            reason: Some(reason),
            selected: false,
            conditional: None,
        }
    }

    pub fn with_conditional(mut self, conditional: Option<Filter>) -> Self {
        self.conditional = conditional;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routing_unit_wire_format() {
        let unit = RoutingUnit {
            message_id: "m-1".into(),
            tenant_id: "t-1".into(),
            retry_count: None,
            dry_run_key: None,
            message_location: MessageLocation::stored("routing/t-1/m-1/abc.json".into()),
        };
        assert_eq!(
            serde_json::to_value(&unit).unwrap(),
            json!({
                "messageId": "m-1",
                "tenantId": "t-1",
                "messageLocation": { "type": "S3", "path": "routing/t-1/m-1/abc.json" },
            })
        );
    }

    #[test]
    fn test_routing_unit_retry_count() {
        let unit: RoutingUnit = serde_json::from_value(json!({
            "messageId": "m-1",
            "tenantId": "t-1",
            "messageLocation": { "type": "JSON", "path": "{}" },
        }))
        .unwrap();
        assert_eq!(unit.retry_count(), 0);
        assert_eq!(unit.message_location.kind, LocationType::Json);

        let retried = unit.with_retry_count(3);
        assert_eq!(retried.retry_count, Some(3));
        assert_eq!(retried.job_id(), "m-1");
    }

    #[test]
    fn test_prepare_job_defaults() {
        let job: PrepareJob = serde_json::from_value(json!({
            "messageId": "m-1",
            "tenantId": "t-1",
            "eventId": "order-shipped",
            "override": { "channels": { "email": { "brand_id": "b-2" } } },
        }))
        .unwrap();
        assert_eq!(job.scope, Scope::PUBLISHED_PRODUCTION);
        assert_eq!(job.retry_count, 0);
        assert!(job.overrides.is_some());
    }

    #[test]
    fn test_status_check_next_attempt_resets_retries() {
        let job = StatusCheckJob {
            message_id: "m-1".into(),
            tenant_id: "t-1".into(),
            provider: "mailgun".into(),
            configuration_id: "cfg-1".into(),
            external_id: "ext-1".into(),
            channel: "email".into(),
            scope: Scope::default(),
            attempt: 2,
            retry_count: 4,
        };
        let next = job.next_attempt();
        assert_eq!(next.attempt, 3);
        assert_eq!(next.retry_count, 0);
        assert_eq!(next.job_id(), "m-1:ext-1");
    }

    #[test]
    fn test_channel_summary_serialization() {
        let summary = ChannelSummary::rejected("push", ReasonCode::ChannelDisabled);
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({ "channel": "push", "reason": "CHANNEL_DISABLED", "selected": false })
        );
    }
}
