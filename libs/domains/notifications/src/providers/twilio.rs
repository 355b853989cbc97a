//! Twilio SMS provider.

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

const KEY: &str = "twilio";
const DEFAULT_API_URL: &str = "https://api.twilio.com/2010-04-01";

/// Twilio SMS provider.
///
/// Configuration JSON: `accountSid`, `authToken`, and either
/// `messagingServiceSid` or `fromNumber`; optional `apiUrl`.
pub struct TwilioProvider {
    client: Client,
}

impl TwilioProvider {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn messages_url(configuration: &Configuration) -> Result<String, ProviderError> {
        let account_sid = required_setting(KEY, configuration, "accountSid")?;
        let api_url = setting(configuration, "apiUrl").unwrap_or(DEFAULT_API_URL);
        Ok(format!(
            "{}/Accounts/{}/Messages",
            api_url.trim_end_matches('/'),
            account_sid
        ))
    }
}

#[derive(Debug, Deserialize)]
struct MessageResource {
    status: String,
}

fn status_from_twilio(status: &str) -> DeliveryStatus {
    match status {
        "delivered" | "read" => DeliveryStatus::Delivered,
        "undelivered" | "failed" | "canceled" => DeliveryStatus::Undeliverable,
        _ => DeliveryStatus::Sent,
    }
}

#[async_trait]
impl Provider for TwilioProvider {
    fn key(&self) -> &'static str {
        KEY
    }

    fn channel_kind(&self) -> &'static str {
        "sms"
    }

    fn delivery_status_strategy(&self) -> DeliveryStatusStrategy {
        DeliveryStatusStrategy::Polling
    }

    fn handles(&self, profile: &Value, _configuration: &Configuration) -> bool {
        profile_field(profile, "phone_number").is_some()
    }

    async fn send(
        &self,
        ctx: &SendContext,
        content: &RenderedContent,
    ) -> Result<ProviderResponse, ProviderError> {
        let account_sid = required_setting(KEY, &ctx.configuration, "accountSid")?;
        let auth_token = required_setting(KEY, &ctx.configuration, "authToken")?;
        let to = profile_field(&ctx.profile, "phone_number")
            .ok_or_else(|| ProviderError::missing(KEY, "profile.phone_number"))?;

        let mut form = vec![("To", to.to_string()), ("Body", content.text.clone())];
        match (
            ctx.send_setting("messagingServiceSid"),
            ctx.send_setting("fromNumber"),
        ) {
            (Some(sid), _) => form.push(("MessagingServiceSid", sid.to_string())),
            (None, Some(from)) => form.push(("From", from.to_string())),
            (None, None) => return Err(ProviderError::missing(KEY, "fromNumber")),
        }

        debug!(message_id = %ctx.message_id, "Sending SMS via Twilio");

        let response = self
            .client
            .post(format!("{}.json", Self::messages_url(&ctx.configuration)?))
            .basic_auth(account_sid, Some(auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;

        if !response.status().is_success() {
            let err = ProviderError::from_response(KEY, response).await;
            warn!(message_id = %ctx.message_id, error = %err, "Twilio rejected the send");
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
        let account_sid = required_setting(KEY, configuration, "accountSid")?;
        let auth_token = required_setting(KEY, configuration, "authToken")?;

        debug!(tenant_id = %tenant_id, external_id = %external_id, "Polling Twilio message");

        let response = self
            .client
            .get(format!("{}/{}.json", Self::messages_url(configuration)?, external_id))
            .basic_auth(account_sid, Some(auth_token))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;

        if !response.status().is_success() {
            return Err(ProviderError::from_response(KEY, response).await);
        }

        let message: MessageResource = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(KEY, e))?;
        Ok(status_from_twilio(&message.status))
    }

    fn external_id(&self, response: &ProviderResponse) -> Option<String> {
        response
            .body
            .get("sid")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn delivered_timestamp(&self, response: &ProviderResponse) -> Option<DateTime<Utc>> {
        response
            .body
            .get("date_sent")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    fn reference(&self, response: &ProviderResponse) -> Value {
        json!({
            "sid": self.external_id(response),
            "status": response.body.get("status"),
        })
    }
}
