//! Stream processors for the prepare, route and status stages.
//!
//! Each processor runs its stage, records the audit event for the outcome,
//! and hands failures back to the stream worker as a categorized
//! [`StreamError`] so its retry policy can decide what happens next.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{StreamError, StreamProcessor};
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditKind, AuditSink, record};
use crate::error::{NotificationError, NotificationResult};
use crate::messages::{PrepareJob, RoutingUnit, StatusCheckJob};
use crate::outcome::StageOutcome;
use crate::prepare::PrepareStage;
use crate::queue::StatusQueue;
use crate::route::RouteStage;
use crate::status::DeliveryStatusPoller;

/// Identifies a job for logging and audit purposes.
struct JobRef<'a> {
    stage: &'static str,
    tenant_id: &'a str,
    message_id: &'a str,
    retry_count: u32,
}

/// Record the audit event and metrics for a finished stage run.
async fn settle(
    audit: &dyn AuditSink,
    job: JobRef<'_>,
    result: NotificationResult<StageOutcome>,
) -> NotificationResult<StageOutcome> {
    match result {
        Ok(outcome) => {
            info!(
                stage = job.stage,
                message_id = %job.message_id,
                tenant_id = %job.tenant_id,
                outcome = outcome.label(),
                "Stage finished"
            );
            counter!(
                "notifications_stage_outcomes_total",
                "stage" => job.stage,
                "outcome" => outcome.label()
            )
            .increment(1);
            if let Some(event) = outcome.audit_event(job.tenant_id, job.message_id) {
                record(audit, event).await;
            }
            Ok(outcome)
        }
        Err(e) => {
            counter!(
                "notifications_stage_outcomes_total",
                "stage" => job.stage,
                "outcome" => "error"
            )
            .increment(1);
            report_error(audit, &job, &e).await;
            Err(e)
        }
    }
}

/// Customer-facing errors are audited on every attempt. Internal errors are
/// audited once, on the first attempt, and always logged at error level.
async fn report_error(audit: &dyn AuditSink, job: &JobRef<'_>, e: &NotificationError) {
    let customer_facing = e.is_customer_facing();
    if customer_facing {
        warn!(
            stage = job.stage,
            message_id = %job.message_id,
            retry_count = job.retry_count,
            error = %e,
            "Stage failed"
        );
    } else {
        error!(
            stage = job.stage,
            message_id = %job.message_id,
            tenant_id = %job.tenant_id,
            retry_count = job.retry_count,
            error = %e,
            "Internal failure"
        );
    }

    if customer_facing || job.retry_count == 0 {
        record(
            audit,
            AuditEvent::new(AuditKind::Error, job.tenant_id, job.message_id)
                .with_message(e.to_string())
                .with_details(json!({
                    "stage": job.stage,
                    "retryable": e.is_retryable(),
                    "retryCount": job.retry_count,
                })),
        )
        .await;
    }
}

pub struct PrepareProcessor {
    stage: PrepareStage,
    audit: Arc<dyn AuditSink>,
}

impl PrepareProcessor {
    pub fn new(stage: PrepareStage, audit: Arc<dyn AuditSink>) -> Self {
        Self { stage, audit }
    }
}

#[async_trait]
impl StreamProcessor<PrepareJob> for PrepareProcessor {
    async fn process(&self, job: &PrepareJob) -> Result<(), StreamError> {
        let result = self.stage.run(job).await;
        settle(
            self.audit.as_ref(),
            JobRef {
                stage: "prepare",
                tenant_id: &job.tenant_id,
                message_id: &job.message_id,
                retry_count: job.retry_count,
            },
            result,
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "PrepareProcessor"
    }
}

pub struct RouteProcessor {
    stage: RouteStage,
    audit: Arc<dyn AuditSink>,
}

impl RouteProcessor {
    pub fn new(stage: RouteStage, audit: Arc<dyn AuditSink>) -> Self {
        Self { stage, audit }
    }
}

#[async_trait]
impl StreamProcessor<RoutingUnit> for RouteProcessor {
    async fn process(&self, unit: &RoutingUnit) -> Result<(), StreamError> {
        let result = self.stage.run(unit).await;
        settle(
            self.audit.as_ref(),
            JobRef {
                stage: "route",
                tenant_id: &unit.tenant_id,
                message_id: &unit.message_id,
                retry_count: unit.retry_count.unwrap_or(0),
            },
            result,
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "RouteProcessor"
    }
}

pub struct StatusProcessor {
    poller: DeliveryStatusPoller,
    queue: Arc<dyn StatusQueue>,
    audit: Arc<dyn AuditSink>,
    max_polls: u32,
}

impl StatusProcessor {
    pub fn new(
        poller: DeliveryStatusPoller,
        queue: Arc<dyn StatusQueue>,
        audit: Arc<dyn AuditSink>,
        max_polls: u32,
    ) -> Self {
        Self {
            poller,
            queue,
            audit,
            max_polls,
        }
    }

    /// Queue the next poll for a message still reported as sent.
    async fn reschedule(&self, job: &StatusCheckJob, outcome: &StageOutcome) -> NotificationResult<()> {
        let StageOutcome::StatusRecorded {
            status,
            retry_after: Some(retry_after),
        } = outcome
        else {
            return Ok(());
        };
        if status.is_final() {
            return Ok(());
        }

        let next = job.next_attempt();
        if next.attempt >= self.max_polls {
            info!(
                message_id = %job.message_id,
                external_id = %job.external_id,
                polls = next.attempt,
                "Status polling limit reached"
            );
            return Ok(());
        }

        let delay = (*retry_after - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.queue.schedule(&next, delay).await
    }
}

#[async_trait]
impl StreamProcessor<StatusCheckJob> for StatusProcessor {
    async fn process(&self, job: &StatusCheckJob) -> Result<(), StreamError> {
        let result = match self.poller.check(job).await {
            Ok(outcome) => self.reschedule(job, &outcome).await.map(|()| outcome),
            Err(e) => Err(e),
        };
        settle(
            self.audit.as_ref(),
            JobRef {
                stage: "status",
                tenant_id: &job.tenant_id,
                message_id: &job.message_id,
                retry_count: job.retry_count,
            },
            result,
        )
        .await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "StatusProcessor"
    }
}
