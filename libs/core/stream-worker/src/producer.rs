//! Appends jobs to a stream.
//!
//! Pipeline stages use it to hand units to the next stage, and the worker
//! uses it to put retries back.
//!
//! ```rust,ignore
//! let producer = StreamProducer::from_stream_def::<RouteStream>(redis);
//! let entry_id = producer.send(&unit).await?;
//! ```

use crate::error::StreamError;
use crate::registry::StreamDef;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use tracing::debug;

/// Field name holding the JSON job payload in every stream entry.
pub const JOB_FIELD: &str = "job";

const DEFAULT_MAX_LENGTH: i64 = 100_000;

#[derive(Clone)]
pub struct StreamProducer {
    redis: ConnectionManager,
    stream_name: String,
    max_length: i64,
}

impl StreamProducer {
    pub fn new(redis: ConnectionManager, stream_name: impl Into<String>) -> Self {
        Self {
            redis,
            stream_name: stream_name.into(),
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// Producer whose stream name and trim length match the worker reading it.
    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        Self::new(redis, S::STREAM_NAME).with_max_length(S::MAX_LENGTH)
    }

    /// Approximate cap passed as `MAXLEN ~`.
    pub fn with_max_length(self, max_length: i64) -> Self {
        Self { max_length, ..self }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn max_length(&self) -> i64 {
        self.max_length
    }

    /// Serialize and append `job`, returning the entry ID.
    pub async fn send<J: Serialize>(&self, job: &J) -> Result<String, StreamError> {
        self.send_raw(&serde_json::to_string(job)?).await
    }

    /// Append a payload that is already JSON.
    pub async fn send_raw(&self, payload: &str) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_length)
            .arg("*")
            .arg(JOB_FIELD)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        debug!(stream = %self.stream_name, entry_id = %entry_id, "Appended job");
        Ok(entry_id)
    }

    /// Current number of entries (XLEN).
    pub async fn stream_length(&self) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();
        Ok(conn.xlen(&self.stream_name).await?)
    }
}
