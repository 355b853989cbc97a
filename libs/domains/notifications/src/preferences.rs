//! Subscription preference checks.

use crate::models::{Category, NotificationConfig, Preferences, ReasonCode, SubscriptionType};
use serde::Serialize;

/// Outcome of a preference check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverability {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_message: Option<String>,
}

impl Deliverability {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason_code: None,
            reason_message: None,
        }
    }

    pub fn unsubscribed(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason_code: Some(ReasonCode::Unsubscribed),
            reason_message: Some(message.into()),
        }
    }
}

/// Decides whether a recipient's preferences allow a notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferenceResolver;

impl PreferenceResolver {
    /// `category_id` is the notification's own `categoryId`. Opt-outs are
    /// honoured for it even when the category document could not be loaded.
    pub fn is_deliverable(
        &self,
        category_id: Option<&str>,
        category: Option<&Category>,
        notification_id: &str,
        notification_config: Option<&NotificationConfig>,
        preferences: &Preferences,
    ) -> Deliverability {
        let category_required = category.is_some_and(|c| {
            c.json.notification_config.subscription_type == Some(SubscriptionType::Required)
        });
        let notification_required =
            notification_config.is_some_and(|c| c.required && !c.inherit_config);

        if category_required || notification_required {
            return Deliverability::allowed();
        }

        if let Some(category_id) = category_id.or(category.map(|c| c.id.as_str()))
            && preferences
                .categories
                .get(category_id)
                .is_some_and(|p| p.blocks_delivery())
        {
            return Deliverability::unsubscribed(format!(
                "Recipient has opted out of category '{}'",
                category_id
            ));
        }

        if preferences
            .notifications
            .get(notification_id)
            .is_some_and(|p| p.blocks_delivery())
        {
            return Deliverability::unsubscribed("Recipient has opted out of this notification");
        }

        Deliverability::allowed()
    }
}
