//! The generic StreamWorker loop.
//!
//! Jobs are processed one at a time. Every message read is acknowledged once
//! its outcome is settled: success, re-enqueued retry, delayed retry, or given
//! up. A failed job never stays pending on the stream; its retry travels as a
//! new message with an incremented retry count.

use crate::config::WorkerConfig;
use crate::consumer::StreamConsumer;
use crate::delayed::DelayedQueue;
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::metrics::StreamMetrics;
use crate::producer::StreamProducer;
use crate::registry::{StreamJob, StreamProcessor};
use crate::retry::{RetryDecision, RetryPolicy};
use redis::aio::ConnectionManager;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 30;

/// Generic stream worker that processes jobs using a processor.
pub struct StreamWorker<J, P>
where
    J: StreamJob,
    P: StreamProcessor<J>,
{
    consumer: StreamConsumer,
    delayed: DelayedQueue,
    processor: Arc<P>,
    config: WorkerConfig,
    policy: RetryPolicy,
    metrics: StreamMetrics,
    _phantom: PhantomData<J>,
}

impl<J, P> StreamWorker<J, P>
where
    J: StreamJob + 'static,
    P: StreamProcessor<J> + 'static,
{
    pub fn new(redis: ConnectionManager, processor: Arc<P>, config: WorkerConfig) -> Self {
        let consumer = StreamConsumer::new(redis.clone(), config.clone());
        let producer = StreamProducer::new(redis.clone(), config.stream_name.clone())
            .with_max_length(config.max_length);
        let delayed = DelayedQueue::new(redis, config.delayed_set.clone(), producer);
        let metrics = StreamMetrics::new(config.stream_name.clone(), processor.name());

        Self {
            consumer,
            delayed,
            processor,
            config,
            policy: RetryPolicy::default(),
            metrics,
            _phantom: PhantomData,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the worker loop until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StreamError> {
        info!(
            consumer_id = %self.config.consumer_id,
            stream = %self.config.stream_name,
            group = %self.config.consumer_group,
            processor = %self.processor.name(),
            max_retries = self.policy.max_retries,
            "Starting stream worker"
        );

        self.consumer.init_consumer_group().await?;

        // Messages this consumer read before a restart but never settled.
        match self.consumer.read_pending::<J>(self.config.batch_size).await {
            Ok(events) => {
                for event in events {
                    self.handle_event(event).await;
                }
            }
            Err(e) => warn!(error = %e, "Failed to read pending messages on startup"),
        }

        let promote_interval = Duration::from_millis(self.config.promote_interval_ms);
        let claim_interval = Duration::from_millis(self.config.claim_timeout_ms.max(1000));
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut last_promote = Instant::now() - promote_interval;
        let mut last_claim = Instant::now();
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Received shutdown signal, stopping worker");
                break;
            }

            if last_promote.elapsed() >= promote_interval {
                self.promote_due().await;
                last_promote = Instant::now();
            }

            if last_claim.elapsed() >= claim_interval {
                self.claim_abandoned().await;
                last_claim = Instant::now();
            }

            match self.consumer.read_new::<J>(self.config.batch_size).await {
                Ok(events) => {
                    if consecutive_errors > 0 {
                        info!(consecutive_errors, "Connection recovered");
                        consecutive_errors = 0;
                    }
                    for event in events {
                        self.handle_event(event).await;
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.recover_from(&e, consecutive_errors).await;
                    continue;
                }
            }

            if self.config.blocking_timeout_ms.is_none() {
                tokio::select! {
                    _ = shutdown.changed() => {}
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }

        info!(stream = %self.config.stream_name, "Stream worker stopped");
        Ok(())
    }

    async fn recover_from(&self, e: &StreamError, consecutive_errors: u32) {
        if e.is_nogroup_error() {
            warn!("Consumer group missing, recreating");
            if let Err(create_err) = self.consumer.init_consumer_group().await {
                error!(error = %create_err, "Failed to recreate consumer group");
            }
        } else if e.is_connection_error() {
            let backoff_secs = 2u64.pow(consecutive_errors.min(5)).min(MAX_BACKOFF_SECS);
            warn!(
                error = %e,
                consecutive_errors,
                backoff_secs,
                "Redis connection error, backing off"
            );
            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            return;
        } else {
            error!(error = %e, "Error reading from stream");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    async fn promote_due(&self) {
        match self.delayed.promote_due(self.config.promote_batch_size).await {
            Ok(0) => {}
            Ok(count) => self.metrics.delayed_promoted(count),
            Err(e) => warn!(error = %e, set = %self.delayed.set_name(), "Failed to promote delayed jobs"),
        }
    }

    async fn claim_abandoned(&self) {
        match self.consumer.claim_abandoned::<J>(self.config.batch_size).await {
            Ok(events) => {
                if !events.is_empty() {
                    self.metrics.messages_claimed(events.len());
                }
                for event in events {
                    self.handle_event(event).await;
                }
            }
            Err(e) => debug!(error = %e, "Error claiming abandoned messages"),
        }
    }

    /// Process one event and settle it.
    pub async fn handle_event(&self, event: StreamEvent<J>) {
        let job_id = event.job_id();
        let queue_lag_ms = event.queue_lag_ms();
        self.metrics.job_received(Duration::from_millis(queue_lag_ms));

        debug!(
            entry_id = %event.entry_id,
            job_id = %job_id,
            retry_count = event.job.retry_count(),
            claimed = event.claimed,
            queue_lag_ms,
            "Processing job"
        );

        let start = Instant::now();
        match self.processor.process(&event.job).await {
            Ok(()) => {
                self.metrics.job_processed(start.elapsed());
            }
            Err(e) => {
                if let Err(retry_err) = self.handle_failure(&event.job, e).await {
                    // Leave the message pending so it is claimed and retried later.
                    error!(
                        entry_id = %event.entry_id,
                        job_id = %job_id,
                        error = %retry_err,
                        "Failed to schedule retry"
                    );
                    return;
                }
            }
        }

        if let Err(e) = self.consumer.ack(&event.entry_id).await {
            error!(entry_id = %event.entry_id, error = %e, "Failed to ACK message");
        }
    }

    async fn handle_failure(&self, job: &J, error: StreamError) -> Result<(), StreamError> {
        let category = error.category();
        let decision = self.policy.decide(category, job.retry_count());
        self.metrics.job_failed(category.as_str(), &decision);

        match decision {
            RetryDecision::Immediate { next } => {
                warn!(
                    job_id = %job.job_id(),
                    error = %error,
                    error_category = category.as_str(),
                    retry_count = next,
                    "Job failed, retrying immediately"
                );
                self.consumer.requeue(&job.with_retry_count(next)).await?;
            }
            RetryDecision::Delayed { next, delay } => {
                warn!(
                    job_id = %job.job_id(),
                    error = %error,
                    error_category = category.as_str(),
                    retry_count = next,
                    delay_secs = delay.as_secs(),
                    "Job failed, scheduling delayed retry"
                );
                self.delayed.schedule(&job.with_retry_count(next), delay).await?;
            }
            RetryDecision::GiveUp => {
                error!(
                    job_id = %job.job_id(),
                    error = %error,
                    retry_count = job.retry_count(),
                    "Job exhausted its retries, giving up"
                );
            }
            RetryDecision::Terminal => {
                error!(
                    job_id = %job.job_id(),
                    error = %error,
                    error_category = category.as_str(),
                    "Job failed permanently"
                );
            }
        }

        Ok(())
    }
}
