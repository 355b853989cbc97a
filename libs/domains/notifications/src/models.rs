//! Domain models for notification routing.
//!
//! Wire names follow the catalog's JSON documents (camelCase keys).

use crate::filter::Filter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};

/// A notification template: its channel graph, gating filter and content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub channels: ChannelGraph,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Notification-level subscription settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_config: Option<NotificationConfig>,
}

/// `always` channels are each attempted; exactly one `bestOf` channel wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelGraph {
    #[serde(default)]
    pub always: Vec<Channel>,
    #[serde(default)]
    pub best_of: Vec<Channel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    /// `kind:provider` (e.g. `email:sendgrid`) or `kind:*`.
    pub taxonomy: String,
    #[serde(default)]
    pub block_ids: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Filter>,
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
    /// Per channel-kind settings, keyed by kind.
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl Channel {
    /// Channel kind, the part of the taxonomy before the colon.
    pub fn kind(&self) -> &str {
        self.taxonomy
            .split_once(':')
            .map_or(self.taxonomy.as_str(), |(kind, _)| kind)
    }

    /// Specific provider named by the taxonomy, if not a wildcard.
    pub fn provider_key(&self) -> Option<&str> {
        self.taxonomy
            .split_once(':')
            .map(|(_, provider)| provider)
            .filter(|p| !p.is_empty() && *p != "*")
    }

    /// Whether any provider entry references a configuration.
    pub fn has_configured_provider(&self) -> bool {
        self.providers.iter().any(|p| p.configuration_id().is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub configuration_id: Option<String>,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Filter>,
}

impl ProviderEntry {
    /// The configuration id, treating an empty string like a missing one.
    pub fn configuration_id(&self) -> Option<&str> {
        self.configuration_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// A content block rendered into channel output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub content: String,
}

/// Provider credentials and settings for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub id: String,
    /// Provider key this configuration belongs to (e.g. `sendgrid`).
    pub provider: String,
    #[serde(default)]
    pub json: Value,
}

/// Subscription category a notification may belong to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub json: CategoryJson,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryJson {
    #[serde(default)]
    pub notification_config: NotificationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionType {
    Required,
    OptOut,
    OptIn,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<SubscriptionType>,
    #[serde(default)]
    pub required: bool,
    /// When set, the notification defers to its category's settings.
    #[serde(default)]
    pub inherit_config: bool,
}

/// A recipient's stored opt-outs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub categories: HashMap<String, Preference>,
    #[serde(default)]
    pub notifications: HashMap<String, Preference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PreferenceStatus>,
    #[serde(default)]
    pub disabled: bool,
}

impl Preference {
    pub fn blocks_delivery(&self) -> bool {
        self.disabled || self.status == Some(PreferenceStatus::OptedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreferenceStatus {
    OptedIn,
    OptedOut,
}

/// Why a notification, unit or channel did not progress.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoProviders,
    Unpublished,
    Unsubscribed,
    NoChannels,
    ChannelDisabled,
    FilteredOutAtChannel,
    FilteredAtProvider,
}

/// Provider-reported delivery state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Undeliverable,
    SentNoRetry,
}

impl DeliveryStatus {
    /// Whether the status is final and polling should stop.
    pub fn is_final(&self) -> bool {
        !matches!(self, DeliveryStatus::Sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScopeState {
    Published,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ScopeEnvironment {
    Production,
    Test,
}

/// Which notification version and configuration set a request targets,
/// written as `state/environment` (e.g. `published/production`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub state: ScopeState,
    pub environment: ScopeEnvironment,
}

impl Scope {
    pub const PUBLISHED_PRODUCTION: Scope = Scope {
        state: ScopeState::Published,
        environment: ScopeEnvironment::Production,
    };

    /// Draft and test scopes preview the latest draft.
    pub fn uses_draft(&self) -> bool {
        self.state == ScopeState::Draft || self.environment == ScopeEnvironment::Test
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::PUBLISHED_PRODUCTION
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.state, self.environment)
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (state, environment) = s
            .split_once('/')
            .ok_or_else(|| format!("invalid scope '{}'", s))?;
        Ok(Scope {
            state: state
                .parse()
                .map_err(|_| format!("invalid scope state '{}'", state))?,
            environment: environment
                .parse()
                .map_err(|_| format!("invalid scope environment '{}'", environment))?,
        })
    }
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
