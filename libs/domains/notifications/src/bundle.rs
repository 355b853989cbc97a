//! Routing bundle storage.
//!
//! The bundle (notification, configurations, profile, preferences) is kept out
//! of the stream message; routing units carry a [`MessageLocation`] instead.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::messages::{LocationType, MessageLocation, RoutingBundle};

/// Object store for bundles and raw events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BundleStore: Send + Sync {
    async fn put(&self, path: &str, body: &str) -> NotificationResult<()>;

    async fn get(&self, path: &str) -> NotificationResult<Option<String>>;
}

/// Bundles stored as Redis strings with an expiry.
#[derive(Clone)]
pub struct RedisBundleStore {
    redis: ConnectionManager,
    prefix: String,
    ttl: Duration,
}

impl RedisBundleStore {
    pub fn new(redis: ConnectionManager, ttl: Duration) -> Self {
        Self {
            redis,
            prefix: "notifications:bundle:".to_string(),
            ttl,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }
}

#[async_trait]
impl BundleStore for RedisBundleStore {
    async fn put(&self, path: &str, body: &str) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .set_ex(self.key(path), body, self.ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> NotificationResult<Option<String>> {
        let mut conn = self.redis.clone();
        Ok(conn.get(self.key(path)).await?)
    }
}

/// In-memory bundle store (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryBundleStore {
    objects: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryBundleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.objects.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BundleStore for InMemoryBundleStore {
    async fn put(&self, path: &str, body: &str) -> NotificationResult<()> {
        self.objects
            .write()
            .await
            .insert(path.to_string(), body.to_string());
        Ok(())
    }

    async fn get(&self, path: &str) -> NotificationResult<Option<String>> {
        Ok(self.objects.read().await.get(path).cloned())
    }
}

/// Path for one routing unit's bundle.
pub fn routing_bundle_path(tenant_id: &str, message_id: &str) -> String {
    format!("routing/{}/{}/{}.json", tenant_id, message_id, Uuid::new_v4())
}

/// Path for the inbound event behind a message.
pub fn event_path(tenant_id: &str, message_id: &str) -> String {
    format!("events/{}/{}.json", tenant_id, message_id)
}

/// Store a bundle, inlining it when it fits within `inline_max_bytes`.
pub async fn store_bundle(
    store: &dyn BundleStore,
    tenant_id: &str,
    message_id: &str,
    bundle: &RoutingBundle,
    inline_max_bytes: usize,
) -> NotificationResult<MessageLocation> {
    let json = serde_json::to_string(bundle)?;
    if inline_max_bytes > 0 && json.len() <= inline_max_bytes {
        return Ok(MessageLocation::inline(json));
    }

    let path = routing_bundle_path(tenant_id, message_id);
    store.put(&path, &json).await?;
    debug!(message_id = %message_id, path = %path, bytes = json.len(), "Stored routing bundle");
    Ok(MessageLocation::stored(path))
}

pub async fn load_bundle(
    store: &dyn BundleStore,
    location: &MessageLocation,
) -> NotificationResult<RoutingBundle> {
    let json = match location.kind {
        LocationType::Json => location.path.clone(),
        LocationType::S3 => store
            .get(&location.path)
            .await?
            .ok_or_else(|| NotificationError::BundleNotFound(location.path.clone()))?,
    };
    serde_json::from_str(&json)
        .map_err(|e| NotificationError::InvalidMessage(format!("malformed routing bundle: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Notification;
    use serde_json::json;

    fn bundle() -> RoutingBundle {
        RoutingBundle {
            notification: Notification {
                id: "n-1".into(),
                ..Default::default()
            },
            profile: json!({ "email": "jane@acme.io" }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let store = InMemoryBundleStore::new();
        let location = store_bundle(&store, "t-1", "m-1", &bundle(), 0).await.unwrap();

        assert_eq!(location.kind, LocationType::S3);
        assert!(location.path.starts_with("routing/t-1/m-1/"));
        assert!(location.path.ends_with(".json"));
        assert_eq!(load_bundle(&store, &location).await.unwrap(), bundle());
    }

    #[tokio::test]
    async fn test_small_bundles_inline() {
        let store = InMemoryBundleStore::new();
        let location = store_bundle(&store, "t-1", "m-1", &bundle(), 64 * 1024)
            .await
            .unwrap();

        assert_eq!(location.kind, LocationType::Json);
        assert!(store.paths().await.is_empty());
        assert_eq!(load_bundle(&store, &location).await.unwrap(), bundle());
    }

    #[tokio::test]
    async fn test_missing_bundle() {
        let mut store = MockBundleStore::new();
        store.expect_get().returning(|_| Ok(None));

        let err = load_bundle(&store, &MessageLocation::stored("routing/t-1/m-1/x.json".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::BundleNotFound(_)));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockBundleStore::new();
        store
            .expect_put()
            .returning(|_, _| Err(NotificationError::Storage("unavailable".into())));

        let err = store_bundle(&store, "t-1", "m-1", &bundle(), 0).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_event_path() {
        assert_eq!(event_path("t-1", "m-1"), "events/t-1/m-1.json");
    }
}
