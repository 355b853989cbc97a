use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::NotificationResult;
use crate::models::{Category, Configuration, Notification, Scope, ScopeEnvironment};

/// Read access to notification templates and categories.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Published version of a notification
    async fn get_notification(
        &self,
        tenant_id: &str,
        notification_id: &str,
        scope: Scope,
    ) -> NotificationResult<Option<Notification>>;

    /// Most recent draft of a notification
    async fn get_latest_draft(
        &self,
        tenant_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Option<Notification>>;

    /// Whether the tenant has any drafts at all
    async fn has_drafts(&self, tenant_id: &str) -> NotificationResult<bool>;

    /// Every stored draft of a notification, oldest first
    async fn list_drafts(
        &self,
        tenant_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Vec<Notification>>;

    async fn get_category(
        &self,
        tenant_id: &str,
        category_id: &str,
    ) -> NotificationResult<Option<Category>>;
}

/// Read access to provider configurations, plus the status-check switch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigurationRepository: Send + Sync {
    /// Configurations with the given ids; unknown ids are skipped
    async fn batch_get(
        &self,
        tenant_id: &str,
        environment: ScopeEnvironment,
        ids: &[String],
    ) -> NotificationResult<Vec<Configuration>>;

    /// Stop delivery-status polling for a configuration
    async fn disable_status_checks(
        &self,
        tenant_id: &str,
        configuration_id: &str,
    ) -> NotificationResult<()>;

    async fn status_checks_disabled(
        &self,
        tenant_id: &str,
        configuration_id: &str,
    ) -> NotificationResult<bool>;
}

type Key = (String, String);

fn key(tenant_id: &str, id: &str) -> Key {
    (tenant_id.to_string(), id.to_string())
}

#[derive(Debug, Default)]
struct CatalogState {
    published: HashMap<Key, Notification>,
    drafts: HashMap<Key, Vec<Notification>>,
    categories: HashMap<Key, Category>,
    configurations: HashMap<(String, ScopeEnvironment, String), Configuration>,
    status_checks_disabled: HashSet<Key>,
}

/// In-memory catalog (for development/testing)
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, tenant_id: &str, notification: Notification) {
        let mut state = self.state.write().await;
        state
            .published
            .insert(key(tenant_id, &notification.id), notification);
    }

    pub async fn add_draft(&self, tenant_id: &str, notification: Notification) {
        let mut state = self.state.write().await;
        state
            .drafts
            .entry(key(tenant_id, &notification.id))
            .or_default()
            .push(notification);
    }

    pub async fn put_category(&self, tenant_id: &str, category: Category) {
        let mut state = self.state.write().await;
        state.categories.insert(key(tenant_id, &category.id), category);
    }

    pub async fn put_configuration(
        &self,
        tenant_id: &str,
        environment: ScopeEnvironment,
        configuration: Configuration,
    ) {
        let mut state = self.state.write().await;
        state.configurations.insert(
            (tenant_id.to_string(), environment, configuration.id.clone()),
            configuration,
        );
    }
}

#[async_trait]
impl NotificationRepository for InMemoryCatalog {
    async fn get_notification(
        &self,
        tenant_id: &str,
        notification_id: &str,
        _scope: Scope,
    ) -> NotificationResult<Option<Notification>> {
        let state = self.state.read().await;
        Ok(state.published.get(&key(tenant_id, notification_id)).cloned())
    }

    async fn get_latest_draft(
        &self,
        tenant_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Option<Notification>> {
        let state = self.state.read().await;
        Ok(state
            .drafts
            .get(&key(tenant_id, notification_id))
            .and_then(|d| d.last())
            .cloned())
    }

    async fn has_drafts(&self, tenant_id: &str) -> NotificationResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .drafts
            .iter()
            .any(|((tenant, _), drafts)| tenant == tenant_id && !drafts.is_empty()))
    }

    async fn list_drafts(
        &self,
        tenant_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Vec<Notification>> {
        let state = self.state.read().await;
        Ok(state
            .drafts
            .get(&key(tenant_id, notification_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_category(
        &self,
        tenant_id: &str,
        category_id: &str,
    ) -> NotificationResult<Option<Category>> {
        let state = self.state.read().await;
        Ok(state.categories.get(&key(tenant_id, category_id)).cloned())
    }
}

#[async_trait]
impl ConfigurationRepository for InMemoryCatalog {
    async fn batch_get(
        &self,
        tenant_id: &str,
        environment: ScopeEnvironment,
        ids: &[String],
    ) -> NotificationResult<Vec<Configuration>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .configurations
                    .get(&(tenant_id.to_string(), environment, id.clone()))
                    .cloned()
            })
            .collect())
    }

    async fn disable_status_checks(
        &self,
        tenant_id: &str,
        configuration_id: &str,
    ) -> NotificationResult<()> {
        let mut state = self.state.write().await;
        state
            .status_checks_disabled
            .insert(key(tenant_id, configuration_id));
        tracing::warn!(
            tenant_id = %tenant_id,
            configuration_id = %configuration_id,
            "Disabled delivery status checks"
        );
        Ok(())
    }

    async fn status_checks_disabled(
        &self,
        tenant_id: &str,
        configuration_id: &str,
    ) -> NotificationResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .status_checks_disabled
            .contains(&key(tenant_id, configuration_id)))
    }
}

/// Catalog stored as JSON documents in Redis.
///
/// Keys:
/// - `catalog:{tenant}:notification:{id}` published notification
/// - `catalog:{tenant}:notification:{id}:drafts` list of drafts, newest last
/// - `catalog:{tenant}:drafts` set of notification ids with drafts
/// - `catalog:{tenant}:category:{id}`
/// - `catalog:{tenant}:{environment}:configuration:{id}`
/// - `catalog:{tenant}:status-checks-disabled` set of configuration ids
#[derive(Clone)]
pub struct RedisCatalog {
    redis: ConnectionManager,
}

impl RedisCatalog {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn notification_key(tenant_id: &str, id: &str) -> String {
        format!("catalog:{}:notification:{}", tenant_id, id)
    }

    fn drafts_key(tenant_id: &str, id: &str) -> String {
        format!("catalog:{}:notification:{}:drafts", tenant_id, id)
    }

    fn draft_index_key(tenant_id: &str) -> String {
        format!("catalog:{}:drafts", tenant_id)
    }

    fn category_key(tenant_id: &str, id: &str) -> String {
        format!("catalog:{}:category:{}", tenant_id, id)
    }

    fn configuration_key(tenant_id: &str, environment: ScopeEnvironment, id: &str) -> String {
        format!("catalog:{}:{}:configuration:{}", tenant_id, environment, id)
    }

    fn disabled_key(tenant_id: &str) -> String {
        format!("catalog:{}:status-checks-disabled", tenant_id)
    }

    pub async fn publish(&self, tenant_id: &str, notification: &Notification) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(notification)?;
        let _: () = conn
            .set(Self::notification_key(tenant_id, &notification.id), json)
            .await?;
        Ok(())
    }

    pub async fn add_draft(&self, tenant_id: &str, notification: &Notification) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(notification)?;
        let _: () = redis::pipe()
            .atomic()
            .rpush(Self::drafts_key(tenant_id, &notification.id), json)
            .ignore()
            .sadd(Self::draft_index_key(tenant_id), &notification.id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn put_category(&self, tenant_id: &str, category: &Category) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(category)?;
        let _: () = conn.set(Self::category_key(tenant_id, &category.id), json).await?;
        Ok(())
    }

    pub async fn put_configuration(
        &self,
        tenant_id: &str,
        environment: ScopeEnvironment,
        configuration: &Configuration,
    ) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let json = serde_json::to_string(configuration)?;
        let _: () = conn
            .set(
                Self::configuration_key(tenant_id, environment, &configuration.id),
                json,
            )
            .await?;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, key: String) -> NotificationResult<Option<T>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(key).await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }
}

#[async_trait]
impl NotificationRepository for RedisCatalog {
    async fn get_notification(
        &self,
        tenant_id: &str,
        notification_id: &str,
        _scope: Scope,
    ) -> NotificationResult<Option<Notification>> {
        self.get_json(Self::notification_key(tenant_id, notification_id))
            .await
    }

    async fn get_latest_draft(
        &self,
        tenant_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Option<Notification>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn
            .lindex(Self::drafts_key(tenant_id, notification_id), -1)
            .await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn has_drafts(&self, tenant_id: &str) -> NotificationResult<bool> {
        let mut conn = self.redis.clone();
        let count: i64 = conn.scard(Self::draft_index_key(tenant_id)).await?;
        Ok(count > 0)
    }

    async fn list_drafts(
        &self,
        tenant_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Vec<Notification>> {
        let mut conn = self.redis.clone();
        let raw: Vec<String> = conn
            .lrange(Self::drafts_key(tenant_id, notification_id), 0, -1)
            .await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).map_err(Into::into))
            .collect()
    }

    async fn get_category(
        &self,
        tenant_id: &str,
        category_id: &str,
    ) -> NotificationResult<Option<Category>> {
        self.get_json(Self::category_key(tenant_id, category_id)).await
    }
}

#[async_trait]
impl ConfigurationRepository for RedisCatalog {
    async fn batch_get(
        &self,
        tenant_id: &str,
        environment: ScopeEnvironment,
        ids: &[String],
    ) -> NotificationResult<Vec<Configuration>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids
            .iter()
            .map(|id| Self::configuration_key(tenant_id, environment, id))
            .collect();

        let mut conn = self.redis.clone();
        let raw: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        raw.into_iter()
            .flatten()
            .map(|s| serde_json::from_str(&s).map_err(Into::into))
            .collect()
    }

    async fn disable_status_checks(
        &self,
        tenant_id: &str,
        configuration_id: &str,
    ) -> NotificationResult<()> {
        let mut conn = self.redis.clone();
        let _: () = conn
            .sadd(Self::disabled_key(tenant_id), configuration_id)
            .await?;
        tracing::warn!(
            tenant_id = %tenant_id,
            configuration_id = %configuration_id,
            "Disabled delivery status checks"
        );
        Ok(())
    }

    async fn status_checks_disabled(
        &self,
        tenant_id: &str,
        configuration_id: &str,
    ) -> NotificationResult<bool> {
        let mut conn = self.redis.clone();
        let disabled: bool = conn
            .sismember(Self::disabled_key(tenant_id), configuration_id)
            .await?;
        Ok(disabled)
    }
}
