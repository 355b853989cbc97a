use crate::registry::StreamDef;
use uuid::Uuid;

/// How a [`StreamWorker`](crate::StreamWorker) reads and settles one stream.
///
/// Timings are in milliseconds.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_name: String,
    pub consumer_group: String,
    /// Unique within the group; a fresh one per process unless set.
    pub consumer_id: String,
    /// Sorted set the worker parks delayed retries in.
    pub delayed_set: String,
    pub max_length: i64,
    pub batch_size: usize,
    /// `None` reads with no BLOCK and sleeps `poll_interval_ms` when idle.
    pub blocking_timeout_ms: Option<u64>,
    pub poll_interval_ms: u64,
    /// Pending entries idle longer than this are taken over from their consumer.
    pub claim_timeout_ms: u64,
    pub promote_interval_ms: u64,
    pub promote_batch_size: usize,
}

impl WorkerConfig {
    pub fn from_stream_def<S: StreamDef>() -> Self {
        Self {
            delayed_set: S::DELAYED_SET.to_string(),
            max_length: S::MAX_LENGTH,
            ..Self::new(S::STREAM_NAME, S::CONSUMER_GROUP)
        }
    }

    pub fn new(stream_name: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        let stream_name = stream_name.into();
        Self {
            delayed_set: format!("{}:delayed", stream_name),
            stream_name,
            consumer_group: consumer_group.into(),
            consumer_id: format!("worker-{}", Uuid::new_v4().simple()),
            max_length: 100_000,
            batch_size: 10,
            blocking_timeout_ms: Some(1000),
            poll_interval_ms: 1000,
            claim_timeout_ms: 60_000,
            promote_interval_ms: 1000,
            promote_batch_size: 100,
        }
    }

    pub fn with_consumer_id(self, consumer_id: impl Into<String>) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            ..self
        }
    }

    pub fn with_blocking(self, blocking_timeout_ms: Option<u64>) -> Self {
        Self {
            blocking_timeout_ms,
            ..self
        }
    }

    /// Never below one entry per read.
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            ..self
        }
    }
}
