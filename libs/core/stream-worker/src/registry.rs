//! Stream definitions and the job/processor traits.
//!
//! This module provides:
//! - `StreamDef` trait for domain-specific stream definitions
//! - `StreamJob` trait for job payloads
//! - `StreamProcessor` trait for job processors

use crate::error::StreamError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// Stream definition trait.
///
/// Each domain implements this trait to define their stream configuration.
///
/// # Example
///
/// ```rust,ignore
/// use stream_worker::StreamDef;
///
/// pub struct PrepareStream;
///
/// impl StreamDef for PrepareStream {
///     const STREAM_NAME: &'static str = "notifications:prepare";
///     const CONSUMER_GROUP: &'static str = "prepare_workers";
///     const DELAYED_SET: &'static str = "notifications:prepare:delayed";
/// }
/// ```
pub trait StreamDef: Send + Sync {
    /// The Redis stream name (e.g., "notifications:route").
    const STREAM_NAME: &'static str;

    /// The consumer group name for this stream.
    const CONSUMER_GROUP: &'static str;

    /// Sorted set holding jobs waiting for a delayed retry.
    const DELAYED_SET: &'static str;

    /// Maximum stream length before auto-trim (MAXLEN).
    /// Default: 100,000 entries.
    const MAX_LENGTH: i64 = 100_000;

    /// Get the stream name.
    fn stream_name() -> &'static str {
        Self::STREAM_NAME
    }

    /// Get the consumer group name.
    fn consumer_group() -> &'static str {
        Self::CONSUMER_GROUP
    }

    /// Get the delayed retry set name.
    fn delayed_set() -> &'static str {
        Self::DELAYED_SET
    }
}

/// Trait for stream job payloads.
///
/// The retry count is part of the job itself so that every retry is a new,
/// self-describing message rather than hidden worker state.
pub trait StreamJob: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the job ID for logging and tracking.
    fn job_id(&self) -> String;

    /// Returns the current retry count (0 for a first attempt).
    fn retry_count(&self) -> u32;

    /// Creates a copy of the job carrying `retry_count`.
    fn with_retry_count(&self, retry_count: u32) -> Self;
}

/// Trait for job processors.
///
/// Domain handlers implement this trait to process jobs from the stream.
/// Returning `Err` hands the job to the worker's [`crate::RetryPolicy`].
#[async_trait]
pub trait StreamProcessor<J: StreamJob>: Send + Sync {
    /// Process a single job.
    async fn process(&self, job: &J) -> Result<(), StreamError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// Health check for the processor.
    async fn health_check(&self) -> Result<bool, StreamError> {
        Ok(true)
    }
}
