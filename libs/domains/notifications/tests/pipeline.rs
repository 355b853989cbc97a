//! End-to-end runs of the prepare and route stages over in-memory stores.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use domain_notifications::filter::{Behavior, FilterExpression, FilterOperator, FilterSource};
use domain_notifications::models::{
    Block, Category, CategoryJson, ChannelGraph, NotificationConfig, ProviderEntry,
    ScopeEnvironment, SubscriptionType,
};
use domain_notifications::providers::{MockBehavior, MockProvider};
use domain_notifications::queue::RecordingQueue;
use domain_notifications::{
    AuditKind, Channel, Configuration, Filter, HandlebarsRenderer, InMemoryAuditSink,
    InMemoryBundleStore, InMemoryCatalog, Notification, NotificationError, PipelineConfig,
    PrepareJob, PrepareStage, ProviderDispatcher, ProviderRegistry, ReasonCode, RouteStage,
    RoutingUnit, StageOutcome, StatusCheckJob,
};

const TENANT: &str = "tenant-1";

struct Pipeline {
    catalog: InMemoryCatalog,
    units: RecordingQueue<RoutingUnit>,
    status_checks: RecordingQueue<(StatusCheckJob, Duration)>,
    audit: InMemoryAuditSink,
    email: MockProvider,
    sms: MockProvider,
    prepare: PrepareStage,
    route: RouteStage,
}

impl Pipeline {
    async fn new() -> Self {
        let catalog = InMemoryCatalog::new();
        let bundles = InMemoryBundleStore::new();
        let units = RecordingQueue::new();
        let status_checks = RecordingQueue::new();
        let audit = InMemoryAuditSink::new();
        let email = MockProvider::new("mock-email", "email").requiring("email");
        let sms = MockProvider::new("mock-sms", "sms").requiring("phone_number").polling();

        for (id, provider) in [
            ("cfg-email", "mock-email"),
            ("cfg-email-b", "mock-email"),
            ("cfg-sms", "mock-sms"),
        ] {
            catalog
                .put_configuration(
                    TENANT,
                    ScopeEnvironment::Production,
                    Configuration {
                        id: id.into(),
                        provider: provider.into(),
                        json: json!({ "apiKey": format!("key-{}", id) }),
                    },
                )
                .await;
        }

        let prepare = PrepareStage::new(
            Arc::new(catalog.clone()),
            Arc::new(catalog.clone()),
            Arc::new(bundles.clone()),
            Arc::new(units.clone()),
            PipelineConfig::default(),
        );
        let route = RouteStage::new(
            Arc::new(bundles),
            ProviderRegistry::new()
                .register(Arc::new(email.clone()))
                .register(Arc::new(sms.clone())),
            Arc::new(HandlebarsRenderer::new()),
            ProviderDispatcher::new(
                Arc::new(audit.clone()),
                Arc::new(status_checks.clone()),
                Duration::from_secs(300),
            ),
            Arc::new(audit.clone()),
        );

        Self {
            catalog,
            units,
            status_checks,
            audit,
            email,
            sms,
            prepare,
            route,
        }
    }

    /// Prepare `job` and route every unit it produced.
    async fn run(&self, job: &PrepareJob) -> Vec<Result<StageOutcome, NotificationError>> {
        let outcome = self.prepare.run(job).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Enqueued { .. }), "{:?}", outcome);

        let mut outcomes = Vec::new();
        for unit in self.units.items() {
            outcomes.push(self.route.run(&unit).await);
        }
        outcomes
    }
}

fn channel(id: &str, taxonomy: &str, configuration_ids: &[&str]) -> Channel {
    Channel {
        id: id.into(),
        taxonomy: taxonomy.into(),
        providers: configuration_ids
            .iter()
            .map(|id| ProviderEntry {
                configuration_id: Some(id.to_string()),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

fn notification(always: Vec<Channel>, best_of: Vec<Channel>) -> Notification {
    Notification {
        id: "order-shipped".into(),
        channels: ChannelGraph { always, best_of },
        blocks: vec![Block {
            id: "b-1".into(),
            kind: "text".into(),
            content: "Hi {{profile.name}}, order {{data.order}} shipped.".into(),
        }],
        ..Default::default()
    }
}

fn job() -> PrepareJob {
    PrepareJob {
        message_id: "m-1".into(),
        tenant_id: TENANT.into(),
        event_id: "order-shipped".into(),
        profile: json!({ "name": "Jane", "email": "jane@acme.io", "phone_number": "+15550100" }),
        data: json!({ "order": "A-42", "vip": false }),
        ..Default::default()
    }
}

fn sent_to(outcome: &Result<StageOutcome, NotificationError>) -> &str {
    match outcome {
        Ok(StageOutcome::Delivered { provider, .. }) => provider,
        other => panic!("expected a delivery, got {:?}", other),
    }
}

#[tokio::test]
async fn test_always_channels_and_best_of_each_deliver() {
    let pipeline = Pipeline::new().await;
    pipeline
        .catalog
        .publish(
            TENANT,
            notification(
                vec![
                    channel("email", "email:*", &["cfg-email"]),
                    channel("sms", "sms:*", &["cfg-sms"]),
                ],
                vec![channel("fallback", "email:*", &["cfg-email-b"])],
            ),
        )
        .await;

    let outcomes = pipeline.run(&job()).await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(sent_to(&outcomes[0]), "mock-email");
    assert_eq!(sent_to(&outcomes[1]), "mock-sms");
    assert_eq!(sent_to(&outcomes[2]), "mock-email");

    let emails = pipeline.email.sent();
    assert_eq!(emails.len(), 2);
    assert_eq!(emails[0].configuration.id, "cfg-email");
    assert_eq!(emails[1].configuration.id, "cfg-email-b");
    assert_eq!(pipeline.sms.sent().len(), 1);

    // Only the polling provider gets a status check.
    let checks = pipeline.status_checks.items();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].0.provider, "mock-sms");
    assert_eq!(checks[0].0.external_id, "mock-sms-m-1");
}

#[tokio::test]
async fn test_content_is_rendered_from_profile_and_data() {
    let pipeline = Pipeline::new().await;
    pipeline
        .catalog
        .publish(
            TENANT,
            notification(vec![], vec![channel("email", "email:*", &["cfg-email"])]),
        )
        .await;

    let outcomes = pipeline.run(&job()).await;

    match &outcomes[0] {
        Ok(StageOutcome::Delivered { reference, .. }) => {
            assert_eq!(reference["text"], "Hi Jane, order A-42 shipped.");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_second_provider_gets_only_its_configuration() {
    let pipeline = Pipeline::new().await;
    let mut email = channel("email", "email:*", &["cfg-email", "cfg-email-b"]);
    email.providers[0].conditional = Some(Filter {
        behavior: Behavior::Show,
        filters: vec![FilterExpression {
            source: FilterSource::Data,
            property: "vip".into(),
            operator: FilterOperator::Equals,
            value: Some(json!(true)),
        }],
        ..Default::default()
    });
    pipeline
        .catalog
        .publish(TENANT, notification(vec![], vec![email]))
        .await;

    let outcomes = pipeline.run(&job()).await;
    assert_eq!(sent_to(&outcomes[0]), "mock-email");

    let sent = pipeline.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].configuration.id, "cfg-email-b");
    assert_eq!(sent[0].configuration.json, json!({ "apiKey": "key-cfg-email-b" }));

    let routed = pipeline.audit.last(AuditKind::Routed).unwrap();
    assert_eq!(routed.details["configurationId"], "cfg-email-b");
    assert_eq!(routed.details["channelsSummary"][0]["selected"], true);
}

#[tokio::test]
async fn test_hidden_channel_falls_through_to_next() {
    let pipeline = Pipeline::new().await;
    let mut email = channel("email", "email:*", &["cfg-email"]);
    email.conditional = Some(email_is_jane());
    pipeline
        .catalog
        .publish(
            TENANT,
            notification(vec![], vec![email, channel("sms", "sms:*", &["cfg-sms"])]),
        )
        .await;

    let outcomes = pipeline.run(&job()).await;
    assert_eq!(sent_to(&outcomes[0]), "mock-sms");

    let routed = pipeline.audit.last(AuditKind::Routed).unwrap();
    assert_eq!(
        routed.details["channelsSummary"],
        json!([
            {
                "channel": "email",
                "reason": "FILTERED_OUT_AT_CHANNEL",
                "selected": false,
                "conditional": serde_json::to_value(email_is_jane()).unwrap(),
            },
            { "channel": "sms", "selected": true },
        ])
    );
}

fn email_is_jane() -> Filter {
    Filter {
        filters: vec![FilterExpression {
            source: FilterSource::Profile,
            property: "email".into(),
            operator: FilterOperator::Equals,
            value: Some(json!("jane@acme.io")),
        }],
        ..Default::default()
    }
}

async fn publish_in_category(pipeline: &Pipeline, subscription_type: Option<SubscriptionType>) {
    pipeline
        .catalog
        .put_category(
            TENANT,
            Category {
                id: "shipping".into(),
                json: CategoryJson {
                    notification_config: NotificationConfig {
                        subscription_type,
                        ..Default::default()
                    },
                },
            },
        )
        .await;
    let mut n = notification(vec![], vec![channel("email", "email:*", &["cfg-email"])]);
    n.category_id = Some("shipping".into());
    pipeline.catalog.publish(TENANT, n).await;
}

fn opted_out_of_shipping() -> PrepareJob {
    let mut job = job();
    job.preferences = serde_json::from_value(json!({
        "categories": { "shipping": { "status": "OPTED_OUT" } }
    }))
    .unwrap();
    job
}

#[tokio::test]
async fn test_required_category_ignores_opt_out() {
    let pipeline = Pipeline::new().await;
    publish_in_category(&pipeline, Some(SubscriptionType::Required)).await;

    let outcomes = pipeline.run(&opted_out_of_shipping()).await;

    assert_eq!(sent_to(&outcomes[0]), "mock-email");
}

#[tokio::test]
async fn test_opted_out_category_is_undeliverable() {
    let pipeline = Pipeline::new().await;
    publish_in_category(&pipeline, Some(SubscriptionType::OptOut)).await;

    let outcomes = pipeline.run(&opted_out_of_shipping()).await;

    match &outcomes[0] {
        Ok(StageOutcome::Undeliverable { reason, .. }) => {
            assert_eq!(*reason, ReasonCode::Unsubscribed)
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(pipeline.email.sent().is_empty());
    assert!(pipeline.audit.last(AuditKind::Routed).is_none());
}

#[tokio::test]
async fn test_category_opt_out_holds_without_category_document() {
    let pipeline = Pipeline::new().await;
    let mut n = notification(vec![], vec![channel("email", "email:*", &["cfg-email"])]);
    n.category_id = Some("shipping".into());
    pipeline.catalog.publish(TENANT, n).await;

    let outcomes = pipeline.run(&opted_out_of_shipping()).await;

    match &outcomes[0] {
        Ok(StageOutcome::Undeliverable { reason, message }) => {
            assert_eq!(*reason, ReasonCode::Unsubscribed);
            assert!(message.contains("shipping"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(pipeline.email.sent().is_empty());
}

#[tokio::test]
async fn test_no_eligible_channel_is_unroutable() {
    let pipeline = Pipeline::new().await;
    let mut push = channel("push", "push:*", &["cfg-email"]);
    push.disabled = true;
    pipeline
        .catalog
        .publish(
            TENANT,
            notification(vec![], vec![push, channel("sms", "sms:*", &["cfg-sms"])]),
        )
        .await;

    let mut job = job();
    job.profile = json!({ "email": "jane@acme.io" });
    let outcomes = pipeline.run(&job).await;

    match &outcomes[0] {
        Ok(StageOutcome::Unroutable { reason, summary }) => {
            assert_eq!(*reason, ReasonCode::NoChannels);
            assert_eq!(summary.len(), 2);
            assert_eq!(summary[0].reason, Some(ReasonCode::ChannelDisabled));
            assert_eq!(summary[1].reason, Some(ReasonCode::NoProviders));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_dry_run_skips_provider() {
    let pipeline = Pipeline::new().await;
    pipeline
        .catalog
        .publish(
            TENANT,
            notification(vec![], vec![channel("email", "email:*", &["cfg-email"])]),
        )
        .await;

    let mut job = job();
    job.dry_run_key = Some("dry-1".into());
    let outcomes = pipeline.run(&job).await;

    assert_eq!(
        outcomes[0].as_ref().unwrap(),
        &StageOutcome::Simulated {
            provider: "mock-email".into(),
            channel: "email".into(),
            dry_run_key: "dry-1".into(),
        }
    );
    assert!(pipeline.email.sent().is_empty());
    assert_eq!(pipeline.audit.kinds(), vec![AuditKind::Routed]);
}

#[tokio::test]
async fn test_overrides_reach_the_provider() {
    let pipeline = Pipeline::new().await;
    let mut email = channel("email", "email:*", &["cfg-email"]);
    email.config.insert("email".into(), json!({ "replyTo": "support@acme.io" }));
    pipeline
        .catalog
        .publish(TENANT, notification(vec![], vec![email]))
        .await;

    let mut job = job();
    job.brand = Some(json!({ "color": "blue", "logo": "a.png" }));
    job.overrides = Some(json!({
        "channels": { "email": { "config": { "sandbox": true } } },
        "providers": { "mock-email": { "config": { "apiKey": "override" } } },
        "brand": { "color": "red" },
    }));
    pipeline.run(&job).await;

    let sent = pipeline.email.sent();
    assert_eq!(sent[0].configuration.json["apiKey"], "override");
    assert_eq!(
        sent[0].provider_config,
        json!({ "replyTo": "support@acme.io", "sandbox": true })
    );
    assert_eq!(sent[0].brand, Some(json!({ "color": "red", "logo": "a.png" })));
}

#[tokio::test]
async fn test_provider_failure_is_classified() {
    let pipeline = Pipeline::new().await;
    pipeline
        .catalog
        .publish(
            TENANT,
            notification(vec![], vec![channel("email", "email:*", &["cfg-email"])]),
        )
        .await;

    pipeline.email.set_behavior(MockBehavior::Fail(503));
    let outcomes = pipeline.run(&job()).await;
    let err = outcomes[0].as_ref().unwrap_err();
    assert!(err.is_retryable());

    pipeline.email.set_behavior(MockBehavior::Fail(400));
    let retried = pipeline.route.run(&pipeline.units.items()[0]).await;
    assert!(!retried.unwrap_err().is_retryable());

    let attempts: Vec<Value> = pipeline
        .audit
        .events()
        .into_iter()
        .filter(|e| e.kind == AuditKind::ProviderAttempt)
        .map(|e| e.details)
        .collect();
    assert_eq!(attempts.len(), 2);
}
