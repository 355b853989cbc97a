//! Prepare stage: expand a notification's channel graph into routing units.
//!
//! Every `always` channel becomes its own unit whose `bestOf` is that single
//! channel. A non-empty `bestOf` becomes one more unit carrying the whole
//! list, of which the route stage will pick exactly one channel.

use std::sync::Arc;
use tracing::{debug, info};

use crate::bundle::{BundleStore, event_path, store_bundle};
use crate::config::PipelineConfig;
use crate::error::NotificationResult;
use crate::filter::{self, FilterContext};
use crate::messages::{PrepareJob, RoutingBundle, RoutingUnit};
use crate::models::{Channel, ChannelGraph, Notification, ReasonCode};
use crate::outcome::StageOutcome;
use crate::queue::RouteQueue;
use crate::repository::{ConfigurationRepository, NotificationRepository};

/// Split a notification into one notification per routing unit.
pub fn expand(notification: &Notification) -> Vec<Notification> {
    let unit = |best_of: Vec<Channel>| Notification {
        channels: ChannelGraph {
            always: Vec::new(),
            best_of,
        },
        ..notification.clone()
    };

    let mut units: Vec<Notification> = notification
        .channels
        .always
        .iter()
        .map(|channel| unit(vec![channel.clone()]))
        .collect();

    if !notification.channels.best_of.is_empty() {
        units.push(unit(notification.channels.best_of.clone()));
    }

    units
}

/// Whether any channel references at least one provider configuration.
pub fn has_routable_channel(notification: &Notification) -> bool {
    notification
        .channels
        .always
        .iter()
        .chain(&notification.channels.best_of)
        .any(|channel| channel.has_configured_provider())
}

/// Configuration ids referenced anywhere in the channel graph, in order of
/// first appearance.
pub fn configuration_ids(notification: &Notification) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for channel in notification
        .channels
        .always
        .iter()
        .chain(&notification.channels.best_of)
    {
        for id in channel.providers.iter().filter_map(|p| p.configuration_id()) {
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
    }
    ids
}

pub struct PrepareStage {
    notifications: Arc<dyn NotificationRepository>,
    configurations: Arc<dyn ConfigurationRepository>,
    bundles: Arc<dyn BundleStore>,
    queue: Arc<dyn RouteQueue>,
    config: PipelineConfig,
}

impl PrepareStage {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        configurations: Arc<dyn ConfigurationRepository>,
        bundles: Arc<dyn BundleStore>,
        queue: Arc<dyn RouteQueue>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            notifications,
            configurations,
            bundles,
            queue,
            config,
        }
    }

    pub async fn run(&self, job: &PrepareJob) -> NotificationResult<StageOutcome> {
        let Some(notification) = self.load_notification(job).await? else {
            info!(
                message_id = %job.message_id,
                tenant_id = %job.tenant_id,
                event_id = %job.event_id,
                scope = %job.scope,
                "Notification not found"
            );
            return Ok(StageOutcome::Unmapped {
                notification_id: job.event_id.clone(),
            });
        };

        let ctx = FilterContext::new(&job.profile, &job.data);
        if !filter::passes(notification.conditional.as_ref(), &ctx) {
            info!(message_id = %job.message_id, notification_id = %notification.id, "Notification filtered out");
            return Ok(StageOutcome::Filtered {
                notification_id: notification.id,
            });
        }

        if !has_routable_channel(&notification) {
            let reason = self.unroutable_reason(job, &notification).await?;
            info!(message_id = %job.message_id, reason = %reason, "No routable channel");
            return Ok(StageOutcome::Unroutable {
                reason,
                summary: Vec::new(),
            });
        }

        let configurations = self
            .configurations
            .batch_get(
                &job.tenant_id,
                job.scope.environment,
                &configuration_ids(&notification),
            )
            .await?;

        let category = match notification.category_id.as_deref() {
            Some(id) => self.notifications.get_category(&job.tenant_id, id).await?,
            None => None,
        };

        let mut units = Vec::new();
        for unit in expand(&notification) {
            let wanted = configuration_ids(&unit);
            let bundle = RoutingBundle {
                configurations: configurations
                    .iter()
                    .filter(|c| wanted.contains(&c.id))
                    .cloned()
                    .collect(),
                notification: unit,
                profile: job.profile.clone(),
                sent_profile: job.profile.clone(),
                extended_profile: job.extended_profile.clone(),
                preferences: job.preferences.clone(),
                category: category.clone(),
                brand: job.brand.clone(),
                overrides: job.overrides.clone(),
                data: job.data.clone(),
                recipient_id: job.recipient_id.clone(),
                scope: job.scope,
            };
            let location = store_bundle(
                self.bundles.as_ref(),
                &job.tenant_id,
                &job.message_id,
                &bundle,
                self.config.inline_bundle_max_bytes,
            )
            .await?;
            units.push(RoutingUnit {
                message_id: job.message_id.clone(),
                tenant_id: job.tenant_id.clone(),
                retry_count: None,
                dry_run_key: job.dry_run_key.clone(),
                message_location: location,
            });
        }

        self.bundles
            .put(
                &event_path(&job.tenant_id, &job.message_id),
                &serde_json::to_string(job)?,
            )
            .await?;

        for unit in &units {
            self.queue.enqueue(unit).await?;
        }

        info!(
            message_id = %job.message_id,
            tenant_id = %job.tenant_id,
            notification_id = %notification.id,
            units = units.len(),
            "Enqueued routing units"
        );

        Ok(StageOutcome::Enqueued { units: units.len() })
    }

    /// Published version, or the latest draft for draft and test scopes
    /// (falling back to the published version when there is no draft).
    async fn load_notification(&self, job: &PrepareJob) -> NotificationResult<Option<Notification>> {
        if job.scope.uses_draft()
            && let Some(draft) = self
                .notifications
                .get_latest_draft(&job.tenant_id, &job.event_id)
                .await?
        {
            debug!(message_id = %job.message_id, "Using latest draft");
            return Ok(Some(draft));
        }

        self.notifications
            .get_notification(&job.tenant_id, &job.event_id, job.scope)
            .await
    }

    /// `UNPUBLISHED` when a draft of this notification would have been
    /// routable but has not been published yet.
    async fn unroutable_reason(
        &self,
        job: &PrepareJob,
        notification: &Notification,
    ) -> NotificationResult<ReasonCode> {
        if job.scope.uses_draft() || !self.notifications.has_drafts(&job.tenant_id).await? {
            return Ok(ReasonCode::NoProviders);
        }

        let drafts = self
            .notifications
            .list_drafts(&job.tenant_id, &notification.id)
            .await?;
        if drafts.iter().any(has_routable_channel) {
            Ok(ReasonCode::Unpublished)
        } else {
            Ok(ReasonCode::NoProviders)
        }
    }
}
