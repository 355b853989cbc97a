//! Route stage: pick one channel and provider for a routing unit.
//!
//! Channels are tried in `bestOf` order and providers in declaration order;
//! the first provider entry that has a loaded configuration, passes its own
//! filter and can reach the recipient wins. Every channel considered is
//! recorded in the channel summary.

use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink, record};
use crate::bundle::{BundleStore, load_bundle};
use crate::dispatch::ProviderDispatcher;
use crate::error::NotificationResult;
use crate::filter::{self, FilterContext};
use crate::merge::{ResolvedOverrides, deep_merge};
use crate::messages::{ChannelSummary, RoutingBundle, RoutingUnit};
use crate::models::{Channel, Configuration, ProviderEntry, ReasonCode};
use crate::outcome::StageOutcome;
use crate::preferences::PreferenceResolver;
use crate::providers::{Provider, ProviderRegistry, SendContext};
use crate::templates::{ContentRenderer, RenderContext};

/// The winning channel and provider for a unit.
#[derive(Clone)]
pub struct Selection {
    pub channel: Channel,
    pub entry: ProviderEntry,
    pub configuration: Configuration,
    pub provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("channel", &self.channel.id)
            .field("configuration", &self.configuration.id)
            .field("provider", &self.provider.key())
            .finish()
    }
}

/// Walk `channels` in order and return the first eligible pair, plus one
/// summary entry per channel considered.
pub fn select_channel(
    channels: &[Channel],
    configurations: &[Configuration],
    registry: &ProviderRegistry,
    ctx: &FilterContext<'_>,
) -> (Option<Selection>, Vec<ChannelSummary>) {
    let mut summary = Vec::new();

    for channel in channels {
        let kind = channel.kind();

        if channel.disabled {
            summary.push(ChannelSummary::rejected(kind, ReasonCode::ChannelDisabled));
            continue;
        }

        if !filter::passes(channel.conditional.as_ref(), ctx) {
            summary.push(
                ChannelSummary::rejected(kind, ReasonCode::FilteredOutAtChannel)
                    .with_conditional(channel.conditional.clone()),
            );
            continue;
        }

        match select_provider(channel, configurations, registry, ctx) {
            Ok(selection) => {
                summary.push(ChannelSummary::selected(kind));
                return (Some(selection), summary);
            }
            Err(reason) => summary.push(ChannelSummary::rejected(kind, reason)),
        }
    }

    (None, summary)
}

/// First provider entry of `channel` that is fully eligible, or the reason
/// none was.
fn select_provider(
    channel: &Channel,
    configurations: &[Configuration],
    registry: &ProviderRegistry,
    ctx: &FilterContext<'_>,
) -> Result<Selection, ReasonCode> {
    let mut filtered = false;

    for entry in &channel.providers {
        let Some(configuration) = entry
            .configuration_id()
            .and_then(|id| configurations.iter().find(|c| c.id == id))
        else {
            continue;
        };

        let key = entry.key.as_deref().unwrap_or(&configuration.provider);
        let Some(provider) = registry.get(key) else {
            warn!(provider = %key, configuration_id = %configuration.id, "No provider registered");
            continue;
        };

        if channel
            .provider_key()
            .is_some_and(|wanted| wanted != provider.key())
        {
            continue;
        }

        if !filter::passes(entry.conditional.as_ref(), ctx) {
            filtered = true;
            continue;
        }

        if !provider.handles(ctx.profile, configuration) {
            debug!(channel = %channel.id, provider = provider.key(), "Provider cannot reach recipient");
            continue;
        }

        return Ok(Selection {
            channel: channel.clone(),
            entry: entry.clone(),
            configuration: configuration.clone(),
            provider,
        });
    }

    Err(if filtered {
        ReasonCode::FilteredAtProvider
    } else {
        ReasonCode::NoProviders
    })
}

pub struct RouteStage {
    bundles: Arc<dyn BundleStore>,
    registry: ProviderRegistry,
    renderer: Arc<dyn ContentRenderer>,
    dispatcher: ProviderDispatcher,
    audit: Arc<dyn AuditSink>,
    preferences: PreferenceResolver,
}

impl RouteStage {
    pub fn new(
        bundles: Arc<dyn BundleStore>,
        registry: ProviderRegistry,
        renderer: Arc<dyn ContentRenderer>,
        dispatcher: ProviderDispatcher,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            bundles,
            registry,
            renderer,
            dispatcher,
            audit,
            preferences: PreferenceResolver,
        }
    }

    pub async fn run(&self, unit: &RoutingUnit) -> NotificationResult<StageOutcome> {
        let bundle = load_bundle(self.bundles.as_ref(), &unit.message_location).await?;
        let notification = &bundle.notification;

        let deliverability = self.preferences.is_deliverable(
            notification.category_id.as_deref(),
            bundle.category.as_ref(),
            &notification.id,
            notification.notification_config.as_ref(),
            &bundle.preferences,
        );
        if !deliverability.allowed {
            info!(message_id = %unit.message_id, notification_id = %notification.id, "Recipient unsubscribed");
            return Ok(StageOutcome::Undeliverable {
                reason: deliverability.reason_code.unwrap_or(ReasonCode::Unsubscribed),
                message: deliverability.reason_message.unwrap_or_default(),
            });
        }

        let ctx = FilterContext::new(&bundle.profile, &bundle.data);
        let (selection, summary) = select_channel(
            &notification.channels.best_of,
            &bundle.configurations,
            &self.registry,
            &ctx,
        );

        let Some(selection) = selection else {
            info!(message_id = %unit.message_id, candidates = summary.len(), "No channel selected");
            return Ok(StageOutcome::Unroutable {
                reason: ReasonCode::NoChannels,
                summary,
            });
        };

        info!(
            message_id = %unit.message_id,
            tenant_id = %unit.tenant_id,
            channel = %selection.channel.id,
            provider = selection.provider.key(),
            retry_count = unit.retry_count.unwrap_or(0),
            "Routed"
        );
        record(
            self.audit.as_ref(),
            AuditEvent::new(AuditKind::Routed, &unit.tenant_id, &unit.message_id).with_details(json!({
                "channelsSummary": summary,
                "preferences": notification
                    .category_id
                    .as_deref()
                    .or(bundle.category.as_ref().map(|c| c.id.as_str()))
                    .map(|id| json!({ "categoryId": id })),
                "channel": selection.channel.kind(),
                "provider": selection.provider.key(),
                "configurationId": selection.configuration.id,
            })),
        )
        .await;

        let send_ctx = self.send_context(unit, &bundle, &selection);
        let content = self.renderer.render(
            &selection.channel,
            &notification.blocks,
            RenderContext {
                data: &bundle.data,
                profile: &bundle.profile,
                brand: send_ctx.brand.as_ref(),
            },
        )?;

        if let Some(dry_run_key) = &unit.dry_run_key {
            info!(message_id = %unit.message_id, dry_run_key = %dry_run_key, "Dry run, send skipped");
            return Ok(StageOutcome::Simulated {
                provider: selection.provider.key().to_string(),
                channel: selection.channel.kind().to_string(),
                dry_run_key: dry_run_key.clone(),
            });
        }

        self.dispatcher
            .dispatch(selection.provider.as_ref(), &send_ctx, &content, bundle.scope)
            .await
    }

    /// Build the provider's view of the message with overrides applied.
    fn send_context(&self, unit: &RoutingUnit, bundle: &RoutingBundle, selection: &Selection) -> SendContext {
        let kind = selection.channel.kind();
        let overrides =
            ResolvedOverrides::resolve(bundle.overrides.as_ref(), kind, selection.provider.key());

        let mut configuration = selection.configuration.clone();
        if let Some(patch) = overrides.provider {
            deep_merge(&mut configuration.json, patch);
        }

        let mut provider_config = selection
            .channel
            .config
            .get(kind)
            .cloned()
            .unwrap_or(Value::Null);
        deep_merge_non_null(&mut provider_config, &selection.entry.config);
        if let Some(patch) = overrides.channel {
            deep_merge(&mut provider_config, patch);
        }

        let mut brand = bundle.brand.clone();
        if let Some(patch) = overrides.brand {
            deep_merge(brand.get_or_insert(Value::Null), patch);
        }

        SendContext {
            tenant_id: unit.tenant_id.clone(),
            message_id: unit.message_id.clone(),
            profile: bundle.profile.clone(),
            data: bundle.data.clone(),
            channel: selection.channel.clone(),
            configuration,
            provider_config,
            brand,
        }
    }
}

fn deep_merge_non_null(base: &mut Value, patch: &Value) {
    if !patch.is_null() {
        deep_merge(base, patch);
    }
}
