//! Redis-backed catalog and bundle store.
//!
//! Run with `cargo test -p domain_notifications -- --ignored` (needs docker).

use serde_json::json;
use std::time::Duration;

use domain_notifications::bundle::{load_bundle, store_bundle};
use domain_notifications::models::{ChannelGraph, ProviderEntry, ScopeEnvironment};
use domain_notifications::{
    BundleStore, Channel, Configuration, ConfigurationRepository, Notification,
    NotificationError, NotificationRepository, RedisBundleStore, RedisCatalog, RoutingBundle,
    Scope,
};
use test_utils::{TestDataBuilder, TestRedis};

fn notification(id: &str) -> Notification {
    Notification {
        id: id.into(),
        channels: ChannelGraph {
            always: vec![],
            best_of: vec![Channel {
                id: "ch-email".into(),
                taxonomy: "email:*".into(),
                providers: vec![ProviderEntry {
                    configuration_id: Some("cfg-1".into()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        },
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_catalog_round_trip() {
    let redis = TestRedis::new().await;
    let data = TestDataBuilder::from_test_name("catalog_round_trip");
    let tenant = data.tenant_id();
    let catalog = RedisCatalog::new(redis.connection());

    catalog.publish(&tenant, &notification("welcome")).await.unwrap();
    catalog
        .put_configuration(
            &tenant,
            ScopeEnvironment::Production,
            &Configuration {
                id: "cfg-1".into(),
                provider: "sendgrid".into(),
                json: json!({ "apiKey": "k" }),
            },
        )
        .await
        .unwrap();

    let loaded = catalog
        .get_notification(&tenant, "welcome", Scope::default())
        .await
        .unwrap();
    assert_eq!(loaded, Some(notification("welcome")));
    assert!(
        catalog
            .get_notification(&tenant, "missing", Scope::default())
            .await
            .unwrap()
            .is_none()
    );

    let configurations = catalog
        .batch_get(
            &tenant,
            ScopeEnvironment::Production,
            &["cfg-1".to_string(), "cfg-unknown".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(configurations.len(), 1);
    assert_eq!(configurations[0].provider, "sendgrid");

    let test_env = catalog
        .batch_get(&tenant, ScopeEnvironment::Test, &["cfg-1".to_string()])
        .await
        .unwrap();
    assert!(test_env.is_empty());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_drafts_and_status_checks() {
    let redis = TestRedis::new().await;
    let data = TestDataBuilder::from_test_name("drafts_and_status_checks");
    let tenant = data.tenant_id();
    let catalog = RedisCatalog::new(redis.connection());

    assert!(!catalog.has_drafts(&tenant).await.unwrap());

    let mut older = notification("welcome");
    older.category_id = Some("v1".into());
    let mut newer = notification("welcome");
    newer.category_id = Some("v2".into());
    catalog.add_draft(&tenant, &older).await.unwrap();
    catalog.add_draft(&tenant, &newer).await.unwrap();

    assert!(catalog.has_drafts(&tenant).await.unwrap());
    assert_eq!(catalog.list_drafts(&tenant, "welcome").await.unwrap().len(), 2);
    let latest = catalog.get_latest_draft(&tenant, "welcome").await.unwrap();
    assert_eq!(latest.and_then(|n| n.category_id).as_deref(), Some("v2"));

    assert!(!catalog.status_checks_disabled(&tenant, "cfg-1").await.unwrap());
    catalog.disable_status_checks(&tenant, "cfg-1").await.unwrap();
    assert!(catalog.status_checks_disabled(&tenant, "cfg-1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_bundle_store_with_ttl() {
    let redis = TestRedis::new().await;
    let data = TestDataBuilder::from_test_name("bundle_store_with_ttl");
    let tenant = data.tenant_id();
    let message_id = data.message_id();
    let store = RedisBundleStore::new(redis.connection(), Duration::from_secs(60))
        .with_prefix(data.name("bundle", ""));

    let bundle = RoutingBundle {
        notification: notification("welcome"),
        profile: json!({ "email": "jane@acme.io" }),
        ..Default::default()
    };
    let location = store_bundle(&store, &tenant, &message_id, &bundle, 0)
        .await
        .unwrap();
    assert!(location.path.starts_with(&format!("routing/{}/{}/", tenant, message_id)));
    assert_eq!(load_bundle(&store, &location).await.unwrap(), bundle);

    assert!(store.get("routing/nowhere.json").await.unwrap().is_none());
    let mut missing = location.clone();
    missing.path = "routing/nowhere.json".into();
    assert!(matches!(
        load_bundle(&store, &missing).await,
        Err(NotificationError::BundleNotFound(_))
    ));
}
