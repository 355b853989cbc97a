//! In-process provider for tests and local runs.

use super::{DeliveryStatusStrategy, Provider, ProviderError, ProviderResponse, SendContext, profile_field};
use crate::models::{Configuration, DeliveryStatus};
use crate::templates::RenderedContent;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

/// How a [`MockProvider`] answers.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Accept every send.
    Succeed,
    /// Fail every send with this HTTP status.
    Fail(u16),
    /// Fail every send with a timeout.
    Timeout,
}

/// A provider that records what it was asked to send.
#[derive(Clone)]
pub struct MockProvider {
    key: &'static str,
    channel_kind: &'static str,
    required_field: Option<&'static str>,
    strategy: DeliveryStatusStrategy,
    behavior: Arc<Mutex<MockBehavior>>,
    status: Arc<Mutex<Result<DeliveryStatus, u16>>>,
    sent: Arc<Mutex<Vec<SendContext>>>,
}

impl MockProvider {
    pub fn new(key: &'static str, channel_kind: &'static str) -> Self {
        Self {
            key,
            channel_kind,
            required_field: None,
            strategy: DeliveryStatusStrategy::DeliverImmediately,
            behavior: Arc::new(Mutex::new(MockBehavior::Succeed)),
            status: Arc::new(Mutex::new(Ok(DeliveryStatus::Delivered))),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Only handle recipients whose profile carries `field`.
    pub fn requiring(mut self, field: &'static str) -> Self {
        self.required_field = Some(field);
        self
    }

    pub fn polling(mut self) -> Self {
        self.strategy = DeliveryStatusStrategy::Polling;
        self
    }

    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        self.set_behavior(behavior);
        self
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        if let Ok(mut guard) = self.behavior.lock() {
            *guard = behavior;
        }
    }

    /// Answer status polls with `status`, or with an HTTP error status.
    pub fn set_delivery_status(&self, status: Result<DeliveryStatus, u16>) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status;
        }
    }

    /// Contexts passed to successful and failed sends, in call order.
    pub fn sent(&self) -> Vec<SendContext> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn behavior(&self) -> MockBehavior {
        self.behavior
            .lock()
            .map(|b| b.clone())
            .unwrap_or(MockBehavior::Succeed)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn key(&self) -> &'static str {
        self.key
    }

    fn channel_kind(&self) -> &'static str {
        self.channel_kind
    }

    fn delivery_status_strategy(&self) -> DeliveryStatusStrategy {
        self.strategy
    }

    fn handles(&self, profile: &Value, _configuration: &Configuration) -> bool {
        self.required_field
            .is_none_or(|field| profile_field(profile, field).is_some())
    }

    async fn send(
        &self,
        ctx: &SendContext,
        content: &RenderedContent,
    ) -> Result<ProviderResponse, ProviderError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(ctx.clone());
        }

        match self.behavior() {
            MockBehavior::Succeed => Ok(ProviderResponse {
                status: 200,
                body: json!({
                    "id": format!("{}-{}", self.key, ctx.message_id),
                    "text": content.text,
                }),
                ..Default::default()
            }),
            MockBehavior::Fail(status) => Err(ProviderError::from_status(self.key, status, "mock failure")),
            MockBehavior::Timeout => Err(ProviderError::Timeout {
                provider: self.key.to_string(),
                message: "mock timeout".to_string(),
            }),
        }
    }

    async fn get_delivery_status(
        &self,
        _external_id: &str,
        _configuration: &Configuration,
        _tenant_id: &str,
    ) -> Result<DeliveryStatus, ProviderError> {
        let status = self
            .status
            .lock()
            .map(|s| *s)
            .unwrap_or(Ok(DeliveryStatus::Sent));
        status.map_err(|code| ProviderError::from_status(self.key, code, "mock status failure"))
    }

    fn external_id(&self, response: &ProviderResponse) -> Option<String> {
        response.body.get("id").and_then(Value::as_str).map(str::to_string)
    }

    fn reference(&self, response: &ProviderResponse) -> Value {
        json!({
            "id": self.external_id(response),
            "text": response.body.get("text"),
        })
    }
}
