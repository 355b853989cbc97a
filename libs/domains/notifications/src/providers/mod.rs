//! Delivery providers.
//!
//! Each provider implements [`Provider`]: a capability predicate, the send
//! call, optional delivery-status polling and extractors over the provider's
//! response. Providers are registered explicitly in a [`ProviderRegistry`] at
//! start-up.

mod error;
mod mailgun;
mod mock;
mod sendgrid;
mod twilio;

pub use error::{ErrorClass, ProviderError};
pub use mailgun::MailgunProvider;
pub use mock::{MockBehavior, MockProvider};
pub use sendgrid::SendGridProvider;
pub use twilio::TwilioProvider;

use crate::models::{Channel, Configuration, DeliveryStatus};
use crate::templates::RenderedContent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Timeout applied to every provider HTTP call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// How a provider reports final delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatusStrategy {
    /// Delivery state must be polled after the send.
    Polling,
    /// The send response is the final word.
    DeliverImmediately,
}

/// Everything a provider needs to send one message.
#[derive(Debug, Clone)]
pub struct SendContext {
    pub tenant_id: String,
    pub message_id: String,
    pub profile: Value,
    pub data: Value,
    pub channel: Channel,
    /// Selected configuration with any overrides applied.
    pub configuration: Configuration,
    /// The provider entry's own settings with any overrides applied.
    pub provider_config: Value,
    pub brand: Option<Value>,
}

impl SendContext {
    /// Sender-facing setting (`fromAddress`, `replyTo`, ...). The provider
    /// entry's config, overrides included, wins over the stored configuration.
    /// Credentials are read from the configuration only.
    pub fn send_setting(&self, field: &str) -> Option<&str> {
        self.provider_config
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| setting(&self.configuration, field))
    }

    pub(crate) fn required_send_setting(&self, provider: &str, field: &str) -> Result<&str, ProviderError> {
        self.send_setting(field)
            .ok_or_else(|| ProviderError::missing(provider, field))
    }
}

/// Raw provider response kept for extractors and the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl ProviderResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Capture status, headers and body (JSON if it parses, text otherwise).
    pub async fn read(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let text = response.text().await.unwrap_or_default();
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Self {
            status,
            headers,
            body,
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key, matching `Configuration::provider`.
    fn key(&self) -> &'static str;

    /// Channel kind this provider delivers (`email`, `sms`, ...).
    fn channel_kind(&self) -> &'static str;

    fn delivery_status_strategy(&self) -> DeliveryStatusStrategy {
        DeliveryStatusStrategy::DeliverImmediately
    }

    /// Whether the provider can reach this recipient with this configuration.
    fn handles(&self, profile: &Value, configuration: &Configuration) -> bool;

    async fn send(
        &self,
        ctx: &SendContext,
        content: &RenderedContent,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Query delivery state for a previous send. Only polling providers
    /// override this.
    async fn get_delivery_status(
        &self,
        _external_id: &str,
        _configuration: &Configuration,
        _tenant_id: &str,
    ) -> Result<DeliveryStatus, ProviderError> {
        Ok(DeliveryStatus::SentNoRetry)
    }

    fn external_id(&self, response: &ProviderResponse) -> Option<String>;

    fn delivered_timestamp(&self, _response: &ProviderResponse) -> Option<DateTime<Utc>> {
        None
    }

    /// Provider-specific fields worth keeping in the audit trail.
    fn reference(&self, response: &ProviderResponse) -> Value;
}

/// Explicit table of providers keyed by [`Provider::key`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The providers this pipeline ships with.
    pub fn with_defaults() -> reqwest::Result<Self> {
        let client = http_client()?;
        Ok(Self::new()
            .register(Arc::new(SendGridProvider::new(client.clone())))
            .register(Arc::new(MailgunProvider::new(client.clone())))
            .register(Arc::new(TwilioProvider::new(client))))
    }

    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider.key(), provider);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<&'static str> {
        let mut keys: Vec<_> = self.providers.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

/// Shared HTTP client for provider calls, with [`PROVIDER_TIMEOUT`] on
/// every request.
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder().timeout(PROVIDER_TIMEOUT).build()
}

/// Read a string setting from a configuration's JSON.
pub(crate) fn setting<'a>(configuration: &'a Configuration, field: &str) -> Option<&'a str> {
    configuration
        .json
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub(crate) fn required_setting<'a>(
    provider: &str,
    configuration: &'a Configuration,
    field: &str,
) -> Result<&'a str, ProviderError> {
    setting(configuration, field).ok_or_else(|| ProviderError::missing(provider, field))
}

/// Read a non-empty string from the recipient profile.
pub(crate) fn profile_field<'a>(profile: &'a Value, field: &str) -> Option<&'a str> {
    profile
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
