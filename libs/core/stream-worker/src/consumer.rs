//! Stream consumer for Redis operations
//!
//! Handles reading messages from Redis streams using consumer groups.
//! Entries that cannot be decoded into a job are logged and acknowledged so
//! they never block the group.

use crate::config::WorkerConfig;
use crate::error::StreamError;
use crate::event::StreamEvent;
use crate::producer::JOB_FIELD;
use crate::registry::StreamJob;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamReadOptions,
    StreamReadReply,
};
use redis::{AsyncCommands, RedisResult};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Stream consumer for Redis operations
#[derive(Clone)]
pub struct StreamConsumer {
    redis: ConnectionManager,
    config: WorkerConfig,
}

impl StreamConsumer {
    /// Create a new StreamConsumer
    pub fn new(redis: ConnectionManager, config: WorkerConfig) -> Self {
        Self { redis, config }
    }

    /// Get the stream name
    pub fn stream_name(&self) -> &str {
        &self.config.stream_name
    }

    /// Get the consumer group
    pub fn consumer_group(&self) -> &str {
        &self.config.consumer_group
    }

    /// Get the consumer ID
    pub fn consumer_id(&self) -> &str {
        &self.config.consumer_id
    }

    /// Initialize the consumer group if it doesn't exist
    pub async fn init_consumer_group(&self) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = conn
            .xgroup_create_mkstream(&self.config.stream_name, &self.config.consumer_group, "0")
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.stream_name,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
            }
            Err(e) => return Err(StreamError::Redis(e)),
        }

        Ok(())
    }

    /// Read messages delivered to this consumer but never acknowledged
    pub async fn read_pending<J: StreamJob>(
        &self,
        count: usize,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(count);

        self.read_with(opts, "0").await
    }

    /// Read new messages from the stream
    pub async fn read_new<J: StreamJob>(
        &self,
        count: usize,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let mut opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, &self.config.consumer_id)
            .count(count);

        if let Some(timeout) = self.config.blocking_timeout_ms {
            opts = opts.block(timeout as usize);
        }

        self.read_with(opts, ">").await
    }

    async fn read_with<J: StreamJob>(
        &self,
        opts: StreamReadOptions,
        id: &str,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let mut conn = self.redis.clone();

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.config.stream_name], &[id], &opts)
            .await?;

        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        self.decode_entries(entries, false).await
    }

    /// Acknowledge a message
    pub async fn ack(&self, stream_id: &str) -> Result<(), StreamError> {
        let mut conn = self.redis.clone();

        let _: i64 = conn
            .xack(
                &self.config.stream_name,
                &self.config.consumer_group,
                &[stream_id],
            )
            .await?;

        debug!(stream_id = %stream_id, "Acknowledged message");
        Ok(())
    }

    /// Re-enqueue a job on this consumer's stream as a fresh entry.
    pub async fn requeue<J: Serialize>(&self, job: &J) -> Result<String, StreamError> {
        let mut conn = self.redis.clone();
        let job_json = serde_json::to_string(job)?;

        let stream_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.config.max_length)
            .arg("*")
            .arg(JOB_FIELD)
            .arg(&job_json)
            .query_async(&mut conn)
            .await?;

        Ok(stream_id)
    }

    /// Claim messages other consumers abandoned for longer than the claim timeout
    pub async fn claim_abandoned<J: StreamJob>(
        &self,
        count: usize,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let mut conn = self.redis.clone();

        let pending: StreamPendingCountReply = conn
            .xpending_count(
                &self.config.stream_name,
                &self.config.consumer_group,
                "-",
                "+",
                count,
            )
            .await?;

        let claim_ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.consumer != self.config.consumer_id)
            .filter(|p| p.last_delivered_ms as u64 > self.config.claim_timeout_ms)
            .map(|p| p.id)
            .collect();

        if claim_ids.is_empty() {
            return Ok(vec![]);
        }

        let claimed: StreamClaimReply = conn
            .xclaim(
                &self.config.stream_name,
                &self.config.consumer_group,
                &self.config.consumer_id,
                self.config.claim_timeout_ms as usize,
                &claim_ids,
            )
            .await?;

        let events = self.decode_entries(claimed.ids, true).await?;
        if !events.is_empty() {
            warn!(count = events.len(), "Claimed abandoned messages");
        }
        Ok(events)
    }

    /// Get stream info (length and pending count)
    pub async fn stream_info(&self) -> Result<StreamInfo, StreamError> {
        let mut conn = self.redis.clone();

        let length: i64 = conn.xlen(&self.config.stream_name).await?;

        let pending: RedisResult<StreamPendingReply> = conn
            .xpending(&self.config.stream_name, &self.config.consumer_group)
            .await;
        let pending_count = pending.map(|p| p.count() as i64).unwrap_or(0);

        let delayed_count: i64 = conn.zcard(&self.config.delayed_set).await?;

        Ok(StreamInfo {
            stream_name: self.config.stream_name.clone(),
            consumer_group: self.config.consumer_group.clone(),
            length,
            pending_count,
            delayed_count,
        })
    }

    /// Decode entries into events, acknowledging entries that carry no
    /// decodable job.
    async fn decode_entries<J: StreamJob>(
        &self,
        entries: Vec<StreamId>,
        claimed: bool,
    ) -> Result<Vec<StreamEvent<J>>, StreamError> {
        let mut events = Vec::with_capacity(entries.len());

        for entry in entries {
            match decode_entry::<J>(&entry) {
                Ok(job) => {
                    let event = StreamEvent::new(entry.id, job);
                    events.push(if claimed { event.claimed() } else { event });
                }
                Err(reason) => {
                    warn!(
                        stream = %self.config.stream_name,
                        stream_id = %entry.id,
                        reason = %reason,
                        "Dropping malformed stream entry"
                    );
                    self.ack(&entry.id).await?;
                }
            }
        }

        Ok(events)
    }
}

fn decode_entry<J: StreamJob>(entry: &StreamId) -> Result<J, String> {
    let json: String = entry
        .get(JOB_FIELD)
        .ok_or_else(|| format!("missing '{}' field", JOB_FIELD))?;
    serde_json::from_str(&json).map_err(|e| e.to_string())
}

/// Stream information
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub stream_name: String,
    pub consumer_group: String,
    pub length: i64,
    pub pending_count: i64,
    pub delayed_count: i64,
}
