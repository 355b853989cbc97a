//! Provider dispatch: the send call, its audit records and the follow-up
//! status poll for polling providers.

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink, record};
use crate::error::{NotificationError, NotificationResult};
use crate::messages::StatusCheckJob;
use crate::models::Scope;
use crate::outcome::StageOutcome;
use crate::providers::{DeliveryStatusStrategy, Provider, SendContext};
use crate::queue::StatusQueue;
use crate::templates::RenderedContent;

pub struct ProviderDispatcher {
    audit: Arc<dyn AuditSink>,
    status_queue: Arc<dyn StatusQueue>,
    poll_interval: Duration,
}

impl ProviderDispatcher {
    pub fn new(
        audit: Arc<dyn AuditSink>,
        status_queue: Arc<dyn StatusQueue>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            audit,
            status_queue,
            poll_interval,
        }
    }

    /// Send through `provider`. Provider failures come back as
    /// [`NotificationError::Provider`] carrying their classification.
    pub async fn dispatch(
        &self,
        provider: &dyn Provider,
        ctx: &SendContext,
        content: &RenderedContent,
        scope: Scope,
    ) -> NotificationResult<StageOutcome> {
        record(
            self.audit.as_ref(),
            AuditEvent::new(AuditKind::ProviderAttempt, &ctx.tenant_id, &ctx.message_id).with_details(json!({
                "provider": provider.key(),
                "channel": ctx.channel.kind(),
                "configurationId": ctx.configuration.id,
            })),
        )
        .await;

        let response = match provider.send(ctx, content).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    message_id = %ctx.message_id,
                    provider = provider.key(),
                    error = %e,
                    retryable = e.is_retryable(),
                    "Provider send failed"
                );
                return Err(NotificationError::Provider(e));
            }
        };

        let external_id = provider.external_id(&response);
        info!(
            message_id = %ctx.message_id,
            tenant_id = %ctx.tenant_id,
            provider = provider.key(),
            channel = ctx.channel.kind(),
            external_id = ?external_id,
            "Message sent"
        );

        let mut status_check_scheduled = false;
        if provider.delivery_status_strategy() == DeliveryStatusStrategy::Polling
            && let Some(external_id) = &external_id
        {
            let job = StatusCheckJob {
                message_id: ctx.message_id.clone(),
                tenant_id: ctx.tenant_id.clone(),
                provider: provider.key().to_string(),
                configuration_id: ctx.configuration.id.clone(),
                external_id: external_id.clone(),
                channel: ctx.channel.kind().to_string(),
                scope,
                attempt: 0,
                retry_count: 0,
            };
            // The send already happened; a failed schedule must not trigger a resend.
            match self.status_queue.schedule(&job, self.poll_interval).await {
                Ok(()) => status_check_scheduled = true,
                Err(e) => warn!(
                    message_id = %ctx.message_id,
                    error = %e,
                    "Failed to schedule delivery status check"
                ),
            }
        }

        Ok(StageOutcome::Delivered {
            provider: provider.key().to_string(),
            channel: ctx.channel.kind().to_string(),
            delivered_at: provider.delivered_timestamp(&response),
            reference: provider.reference(&response),
            external_id,
            status_check_scheduled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditSink;
    use crate::models::{Channel, Configuration};
    use crate::providers::{MockBehavior, MockProvider, ProviderError};
    use crate::queue::RecordingQueue;
    use serde_json::Value;

    fn ctx() -> SendContext {
        SendContext {
            tenant_id: "t-1".into(),
            message_id: "m-1".into(),
            profile: json!({ "email": "jane@acme.io" }),
            data: json!({}),
            channel: Channel {
                id: "ch-email".into(),
                taxonomy: "email:*".into(),
                ..Default::default()
            },
            configuration: Configuration {
                id: "cfg-1".into(),
                provider: "mock".into(),
                json: json!({}),
            },
            provider_config: Value::Null,
            brand: None,
        }
    }

    fn dispatcher(
        audit: &InMemoryAuditSink,
        queue: &RecordingQueue<(StatusCheckJob, Duration)>,
    ) -> ProviderDispatcher {
        ProviderDispatcher::new(
            Arc::new(audit.clone()),
            Arc::new(queue.clone()),
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_immediate_provider() {
        let audit = InMemoryAuditSink::new();
        let queue = RecordingQueue::new();
        let provider = MockProvider::new("mock", "email");

        let outcome = dispatcher(&audit, &queue)
            .dispatch(&provider, &ctx(), &RenderedContent::text("hi"), Scope::default())
            .await
            .unwrap();

        match outcome {
            StageOutcome::Delivered {
                external_id,
                status_check_scheduled,
                ..
            } => {
                assert_eq!(external_id.as_deref(), Some("mock-m-1"));
                assert!(!status_check_scheduled);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(audit.kinds(), vec![AuditKind::ProviderAttempt]);
        assert!(queue.items().is_empty());
    }

    #[tokio::test]
    async fn test_polling_provider_schedules_status_check() {
        let audit = InMemoryAuditSink::new();
        let queue = RecordingQueue::new();
        let provider = MockProvider::new("mock", "email").polling();

        dispatcher(&audit, &queue)
            .dispatch(&provider, &ctx(), &RenderedContent::text("hi"), Scope::default())
            .await
            .unwrap();

        let scheduled = queue.items();
        assert_eq!(scheduled.len(), 1);
        let (job, delay) = &scheduled[0];
        assert_eq!(job.external_id, "mock-m-1");
        assert_eq!(job.configuration_id, "cfg-1");
        assert_eq!(job.attempt, 0);
        assert_eq!(*delay, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_failure_is_classified() {
        let audit = InMemoryAuditSink::new();
        let queue = RecordingQueue::new();
        let provider = MockProvider::new("mock", "email").with_behavior(MockBehavior::Fail(413));

        let err = dispatcher(&audit, &queue)
            .dispatch(&provider, &ctx(), &RenderedContent::text("hi"), Scope::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NotificationError::Provider(ProviderError::PayloadTooLarge { .. })
        ));
        assert!(!err.is_retryable());
        assert_eq!(audit.kinds(), vec![AuditKind::ProviderAttempt]);
    }
}
