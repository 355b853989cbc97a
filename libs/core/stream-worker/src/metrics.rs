//! Prometheus recorder and the per-stream counters the worker emits.
//!
//! Every series carries `stream` and `processor` labels so the prepare,
//! route and status consumers can be told apart on one dashboard.

use crate::error::StreamError;
use crate::retry::RetryDecision;
use metrics::{Label, counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global recorder. Safe to call more than once.
pub fn init_metrics() -> Result<(), StreamError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| StreamError::Config(format!("prometheus recorder: {}", e)))?;
        info!("Prometheus recorder installed");
        Ok::<_, StreamError>(handle)
    })?;
    Ok(())
}

/// `None` until [`init_metrics`] has run.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

#[derive(Clone)]
pub struct StreamMetrics {
    labels: Vec<Label>,
}

impl StreamMetrics {
    pub fn new(stream_name: impl Into<String>, processor_name: impl Into<String>) -> Self {
        Self {
            labels: vec![
                Label::new("stream", stream_name.into()),
                Label::new("processor", processor_name.into()),
            ],
        }
    }

    fn with(&self, key: &'static str, value: impl Into<String>) -> Vec<Label> {
        let mut labels = self.labels.clone();
        labels.push(Label::new(key, value.into()));
        labels
    }

    /// A job was read; `queue_lag` is how long it sat in the stream.
    pub fn job_received(&self, queue_lag: Duration) {
        counter!("stream_worker_jobs_received_total", self.labels.clone()).increment(1);
        histogram!("stream_worker_queue_lag_seconds", self.labels.clone())
            .record(queue_lag.as_secs_f64());
    }

    pub fn job_processed(&self, duration: Duration) {
        counter!("stream_worker_jobs_processed_total", self.labels.clone()).increment(1);
        histogram!("stream_worker_job_duration_seconds", self.labels.clone())
            .record(duration.as_secs_f64());
    }

    pub fn job_failed(&self, category: &str, decision: &RetryDecision) {
        let mut labels = self.with("category", category);
        labels.push(Label::new("decision", decision.as_str()));
        counter!("stream_worker_job_errors_total", labels).increment(1);
    }

    pub fn messages_claimed(&self, count: usize) {
        counter!("stream_worker_messages_claimed_total", self.labels.clone())
            .increment(count as u64);
    }

    pub fn delayed_promoted(&self, count: usize) {
        counter!(
            "stream_worker_delayed_promoted_total",
            self.with("source", "delayed_set")
        )
        .increment(count as u64);
    }
}
