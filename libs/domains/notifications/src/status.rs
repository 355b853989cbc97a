//! Delivery-status polling for providers that report delivery after the send.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{NotificationError, NotificationResult};
use crate::messages::StatusCheckJob;
use crate::models::DeliveryStatus;
use crate::outcome::StageOutcome;
use crate::providers::ProviderRegistry;
use crate::repository::ConfigurationRepository;

pub struct DeliveryStatusPoller {
    configurations: Arc<dyn ConfigurationRepository>,
    registry: ProviderRegistry,
    poll_interval: Duration,
}

impl DeliveryStatusPoller {
    pub fn new(
        configurations: Arc<dyn ConfigurationRepository>,
        registry: ProviderRegistry,
        poll_interval: Duration,
    ) -> Self {
        Self {
            configurations,
            registry,
            poll_interval,
        }
    }

    /// Ask the provider for the message's current delivery state.
    ///
    /// A still-`SENT` message or a timed-out poll comes back with a
    /// `retry_after`. Bad-request and auth failures switch status checks off
    /// for the configuration and settle the message as `SENT_NO_RETRY`.
    pub async fn check(&self, job: &StatusCheckJob) -> NotificationResult<StageOutcome> {
        if self
            .configurations
            .status_checks_disabled(&job.tenant_id, &job.configuration_id)
            .await?
        {
            debug!(configuration_id = %job.configuration_id, "Status checks disabled");
            return Ok(StageOutcome::StatusSkipped);
        }

        let provider = self
            .registry
            .get(&job.provider)
            .ok_or_else(|| NotificationError::UnknownProvider(job.provider.clone()))?;

        let configuration = self
            .configurations
            .batch_get(
                &job.tenant_id,
                job.scope.environment,
                std::slice::from_ref(&job.configuration_id),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                NotificationError::InvalidConfiguration(format!(
                    "configuration {} not found",
                    job.configuration_id
                ))
            })?;

        let retry_after = || Some(Utc::now() + self.poll_interval);

        match provider
            .get_delivery_status(&job.external_id, &configuration, &job.tenant_id)
            .await
        {
            Ok(DeliveryStatus::Sent) => Ok(StageOutcome::StatusRecorded {
                status: DeliveryStatus::Sent,
                retry_after: retry_after(),
            }),
            Ok(status) => {
                info!(
                    message_id = %job.message_id,
                    external_id = %job.external_id,
                    status = %status,
                    "Delivery status settled"
                );
                Ok(StageOutcome::StatusRecorded {
                    status,
                    retry_after: None,
                })
            }
            Err(e) if e.is_timeout() => {
                warn!(message_id = %job.message_id, error = %e, "Status poll timed out");
                Ok(StageOutcome::StatusRecorded {
                    status: DeliveryStatus::Sent,
                    retry_after: retry_after(),
                })
            }
            Err(e) if e.disables_status_checks() => {
                warn!(
                    message_id = %job.message_id,
                    configuration_id = %job.configuration_id,
                    error = %e,
                    "Disabling status checks for configuration"
                );
                self.configurations
                    .disable_status_checks(&job.tenant_id, &job.configuration_id)
                    .await?;
                Ok(StageOutcome::StatusRecorded {
                    status: DeliveryStatus::SentNoRetry,
                    retry_after: None,
                })
            }
            Err(e) => Err(NotificationError::Provider(e)),
        }
    }
}
