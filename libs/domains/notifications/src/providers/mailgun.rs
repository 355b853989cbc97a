//! Mailgun email provider.
//!
//! Mailgun accepts a message synchronously and reports delivery through its
//! events API, so delivery state is polled.

use super::{
    DeliveryStatusStrategy, Provider, ProviderError, ProviderResponse, SendContext, profile_field,
    required_setting, setting,
};
use crate::models::{Configuration, DeliveryStatus};
use crate::templates::RenderedContent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

const KEY: &str = "mailgun";
const DEFAULT_HOST: &str = "https://api.mailgun.net";

/// Mailgun email provider.
///
/// Configuration JSON: `apiKey`, `domain`, `fromAddress`, optional `host`.
pub struct MailgunProvider {
    client: Client,
}

impl MailgunProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn base_url(configuration: &Configuration) -> Result<String, ProviderError> {
        let domain = required_setting(KEY, configuration, "domain")?;
        let host = setting(configuration, "host").unwrap_or(DEFAULT_HOST);
        Ok(format!("{}/v3/{}", host.trim_end_matches('/'), domain))
    }
}

#[derive(Debug, Deserialize)]
struct EventsPage {
    #[serde(default)]
    items: Vec<MailgunEvent>,
}

#[derive(Debug, Deserialize)]
struct MailgunEvent {
    event: String,
    #[serde(default)]
    severity: Option<String>,
}

/// Map Mailgun's event vocabulary to a delivery status.
fn status_from_events(events: &[MailgunEvent]) -> DeliveryStatus {
    for event in events {
        match (event.event.as_str(), event.severity.as_deref()) {
            ("delivered", _) | ("opened", _) | ("clicked", _) => return DeliveryStatus::Delivered,
            ("failed", Some("permanent")) | ("rejected", _) | ("complained", _) => {
                return DeliveryStatus::Undeliverable;
            }
            _ => {}
        }
    }
    DeliveryStatus::Sent
}

#[async_trait]
impl Provider for MailgunProvider {
    fn key(&self) -> &'static str {
        KEY
    }

    fn channel_kind(&self) -> &'static str {
        "email"
    }

    fn delivery_status_strategy(&self) -> DeliveryStatusStrategy {
        DeliveryStatusStrategy::Polling
    }

    fn handles(&self, profile: &Value, _configuration: &Configuration) -> bool {
        profile_field(profile, "email").is_some()
    }

    async fn send(
        &self,
        ctx: &SendContext,
        content: &RenderedContent,
    ) -> Result<ProviderResponse, ProviderError> {
        let api_key = required_setting(KEY, &ctx.configuration, "apiKey")?;
        let from = ctx.required_send_setting(KEY, "fromAddress")?;
        let to = profile_field(&ctx.profile, "email")
            .ok_or_else(|| ProviderError::missing(KEY, "profile.email"))?;
        let base_url = Self::base_url(&ctx.configuration)?;

        let mut form = vec![
            ("from", from.to_string()),
            ("to", to.to_string()),
            ("subject", content.title.clone().unwrap_or_default()),
            ("text", content.text.clone()),
            ("v:message-id", ctx.message_id.clone()),
        ];
        if let Some(html) = &content.html {
            form.push(("html", html.clone()));
        }
        if let Some(reply_to) = ctx.send_setting("replyTo") {
            form.push(("h:Reply-To", reply_to.to_string()));
        }

        debug!(message_id = %ctx.message_id, "Sending email via Mailgun");

        let response = self
            .client
            .post(format!("{}/messages", base_url))
            .basic_auth("api", Some(api_key))
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;

        if !response.status().is_success() {
            let err = ProviderError::from_response(KEY, response).await;
            warn!(message_id = %ctx.message_id, error = %err, "Mailgun rejected the send");
            return Err(err);
        }

        Ok(ProviderResponse::read(response).await)
    }

    async fn get_delivery_status(
        &self,
        external_id: &str,
        configuration: &Configuration,
        tenant_id: &str,
    ) -> Result<DeliveryStatus, ProviderError> {
        let api_key = required_setting(KEY, configuration, "apiKey")?;
        let base_url = Self::base_url(configuration)?;
        let message_id = external_id.trim_matches(|c| c == '<' || c == '>');

        debug!(tenant_id = %tenant_id, external_id = %message_id, "Polling Mailgun events");

        let response = self
            .client
            .get(format!("{}/events", base_url))
            .basic_auth("api", Some(api_key))
            .query(&[("message-id", message_id)])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(KEY, response).await);
        }

        let page: EventsPage = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;
        Ok(status_from_events(&page.items))
    }

    fn external_id(&self, response: &ProviderResponse) -> Option<String> {
        response
            .body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn delivered_timestamp(&self, _response: &ProviderResponse) -> Option<DateTime<Utc>> {
        None
    }

    fn reference(&self, response: &ProviderResponse) -> Value {
        json!({ "id": self.external_id(response) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::http_client;
    use axum::{Json, Router, routing::get};

    fn event(name: &str, severity: Option<&str>) -> MailgunEvent {
        MailgunEvent {
            event: name.to_string(),
            severity: severity.map(str::to_string),
        }
    }

    #[test]
    fn test_event_mapping() {
        assert_eq!(status_from_events(&[]), DeliveryStatus::Sent);
        assert_eq!(status_from_events(&[event("accepted", None)]), DeliveryStatus::Sent);
        assert_eq!(
            status_from_events(&[event("accepted", None), event("delivered", None)]),
            DeliveryStatus::Delivered
        );
        assert_eq!(
            status_from_events(&[event("failed", Some("temporary"))]),
            DeliveryStatus::Sent
        );
        assert_eq!(
            status_from_events(&[event("failed", Some("permanent"))]),
            DeliveryStatus::Undeliverable
        );
    }

    #[test]
    fn test_external_id_from_body() {
        let provider = MailgunProvider::new(http_client().unwrap());
        let response = ProviderResponse {
            status: 200,
            body: json!({ "id": "<20260101.1@mg.acme.io>", "message": "Queued. Thank you." }),
            ..Default::default()
        };
        assert_eq!(
            provider.external_id(&response).as_deref(),
            Some("<20260101.1@mg.acme.io>")
        );
    }

    #[tokio::test]
    async fn test_poll_reads_events() {
        let app = Router::new().route(
            "/v3/mg.acme.io/events",
            get(|| async { Json(json!({ "items": [{ "event": "delivered" }] })) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let configuration = Configuration {
            id: "cfg-mg".into(),
            provider: KEY.into(),
            json: json!({
                "apiKey": "key-1",
                "domain": "mg.acme.io",
                "host": format!("http://{}", addr),
            }),
        };

        let provider = MailgunProvider::new(http_client().unwrap());
        let status = provider
            .get_delivery_status("<abc@mg.acme.io>", &configuration, "t-1")
            .await
            .unwrap();
        assert_eq!(status, DeliveryStatus::Delivered);
    }
}
