//! SendGrid email provider.

use super::{
    Provider, ProviderError, ProviderResponse, SendContext, profile_field, required_setting,
    setting,
};
use crate::models::Configuration;
use crate::templates::RenderedContent;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const KEY: &str = "sendgrid";
const DEFAULT_API_URL: &str = "https://api.sendgrid.com/v3";

/// SendGrid email provider.
///
/// Configuration JSON: `apiKey`, `fromAddress`, optional `fromName`,
/// `replyTo` and `apiUrl`. The sender fields may also come from the channel's
/// provider config.
pub struct SendGridProvider {
    client: Client,
}

impl SendGridProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

// SendGrid API request structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<EmailAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_args: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[async_trait]
impl Provider for SendGridProvider {
    fn key(&self) -> &'static str {
        KEY
    }

    fn channel_kind(&self) -> &'static str {
        "email"
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
        let from_email = ctx.required_send_setting(KEY, "fromAddress")?;
        let to_email =
            profile_field(&ctx.profile, "email").ok_or_else(|| ProviderError::missing(KEY, "profile.email"))?;
        let api_url = setting(&ctx.configuration, "apiUrl").unwrap_or(DEFAULT_API_URL);

        let mut body = vec![Content {
            content_type: "text/plain".to_string(),
            value: content.text.clone(),
        }];
        if let Some(html) = &content.html {
            body.push(Content {
                content_type: "text/html".to_string(),
                value: html.clone(),
            });
        }

        let request = SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: to_email.to_string(),
                    name: profile_field(&ctx.profile, "name").map(str::to_string),
                }],
            }],
            from: EmailAddress {
                email: from_email.to_string(),
                name: ctx.send_setting("fromName").map(str::to_string),
            },
            reply_to: ctx.send_setting("replyTo").map(|email| EmailAddress {
                email: email.to_string(),
                name: None,
            }),
            subject: content.title.clone().unwrap_or_default(),
            content: body,
            custom_args: Some(json!({
                "messageId": ctx.message_id,
                "tenantId": ctx.tenant_id,
            })),
        };

        debug!(
            message_id = %ctx.message_id,
            configuration_id = %ctx.configuration.id,
            "Sending email via SendGrid"
        );

        let response = self
            .client
            .post(format!("{}/mail/send", api_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;

        if !response.status().is_success() {
            let err = ProviderError::from_response(KEY, response).await;
            warn!(message_id = %ctx.message_id, error = %err, "SendGrid rejected the send");
            return Err(err);
        }

        let response = ProviderResponse::read(response).await;
        info!(
            message_id = %ctx.message_id,
            external_id = ?self.external_id(&response),
            "Email accepted by SendGrid"
        );
        Ok(response)
    }

    fn external_id(&self, response: &ProviderResponse) -> Option<String> {
        response.header("x-message-id").map(str::to_string)
    }

    fn reference(&self, response: &ProviderResponse) -> Value {
        json!({ "x-message-id": response.header("x-message-id") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;
    use crate::providers::{ErrorClass, http_client};
    use axum::{Json, Router, http::StatusCode, routing::post};

    fn configuration(api_url: &str) -> Configuration {
        Configuration {
            id: "cfg-sg".into(),
            provider: KEY.into(),
            json: json!({ "apiKey": "SG.test", "fromAddress": "noreply@acme.io", "apiUrl": api_url }),
        }
    }

    fn context(configuration: Configuration) -> SendContext {
        SendContext {
            tenant_id: "t-1".into(),
            message_id: "m-1".into(),
            profile: json!({ "email": "jane@acme.io" }),
            data: json!({}),
            channel: Channel {
                id: "ch-email".into(),
                taxonomy: "email:sendgrid".into(),
                ..Default::default()
            },
            configuration,
            provider_config: Value::Null,
            brand: None,
        }
    }

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route(
            "/mail/send",
            post(move || async move { (status, [("x-message-id", "sg-123")], "") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    /// Stub that answers 202 and echoes the request body back.
    async fn serve_echo() -> String {
        let app = Router::new().route(
            "/mail/send",
            post(|Json(body): Json<Value>| async move { (StatusCode::ACCEPTED, Json(body)) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_sender_fields_prefer_provider_config() {
        let url = serve_echo().await;
        let provider = SendGridProvider::new(http_client().unwrap());
        let mut config = configuration(&url);
        config.json["fromName"] = json!("Acme");

        let mut ctx = context(config);
        ctx.provider_config = json!({ "fromAddress": "orders@acme.io", "replyTo": "help@acme.io" });

        let response = provider
            .send(&ctx, &RenderedContent::text("hello"))
            .await
            .unwrap();

        assert_eq!(response.body["from"], json!({ "email": "orders@acme.io", "name": "Acme" }));
        assert_eq!(response.body["reply_to"], json!({ "email": "help@acme.io" }));
    }

    #[tokio::test]
    async fn test_sender_fields_fall_back_to_configuration() {
        let url = serve_echo().await;
        let provider = SendGridProvider::new(http_client().unwrap());

        let response = provider
            .send(&context(configuration(&url)), &RenderedContent::text("hello"))
            .await
            .unwrap();

        assert_eq!(response.body["from"], json!({ "email": "noreply@acme.io" }));
        assert!(response.body.get("reply_to").is_none());
    }

    #[test]
    fn test_handles_requires_email() {
        let provider = SendGridProvider::new(http_client().unwrap());
        let config = configuration(DEFAULT_API_URL);
        assert!(provider.handles(&json!({ "email": "a@b.io" }), &config));
        assert!(!provider.handles(&json!({ "phone_number": "+1555" }), &config));
        assert!(!provider.handles(&json!({ "email": "  " }), &config));
    }

    #[tokio::test]
    async fn test_send_extracts_message_id() {
        let url = serve(StatusCode::ACCEPTED).await;
        let provider = SendGridProvider::new(http_client().unwrap());

        let response = provider
            .send(&context(configuration(&url)), &RenderedContent::text("hello"))
            .await
            .unwrap();

        assert_eq!(response.status, 202);
        assert_eq!(provider.external_id(&response).as_deref(), Some("sg-123"));
    }

    #[tokio::test]
    async fn test_send_classifies_failures() {
        let provider = SendGridProvider::new(http_client().unwrap());

        let url = serve(StatusCode::TOO_MANY_REQUESTS).await;
        let err = provider
            .send(&context(configuration(&url)), &RenderedContent::text("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Retryable);

        let url = serve(StatusCode::PAYLOAD_TOO_LARGE).await;
        let err = provider
            .send(&context(configuration(&url)), &RenderedContent::text("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Terminal);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_terminal() {
        let provider = SendGridProvider::new(http_client().unwrap());
        let mut config = configuration(DEFAULT_API_URL);
        config.json = json!({ "fromAddress": "noreply@acme.io" });

        let err = provider
            .send(&context(config), &RenderedContent::text("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingConfiguration { .. }));
    }
}
