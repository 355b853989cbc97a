//! Delayed retry queue
//!
//! Jobs waiting for a delayed retry live in a sorted set scored by the
//! millisecond timestamp at which they become due. A promotion pass moves due
//! members back onto the stream. The append and the removal run in one Lua
//! script, so a member is either still in the set or already on the stream,
//! and concurrent promoters never enqueue the same job twice.

use crate::error::StreamError;
use crate::producer::{JOB_FIELD, StreamProducer};
use crate::registry::StreamDef;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

// KEYS: delayed set, stream. ARGV: member, max length, job field, payload.
// XADD runs before ZREM so a failed append leaves the member in place.
const PROMOTE_SCRIPT: &str = r"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
    redis.call('XADD', KEYS[2], 'MAXLEN', '~', ARGV[2], '*', ARGV[3], ARGV[4])
    redis.call('ZREM', KEYS[1], ARGV[1])
    return 1
end
return 0
";

/// Sorted-set backed queue of jobs waiting to be re-enqueued.
#[derive(Clone)]
pub struct DelayedQueue {
    redis: ConnectionManager,
    set_name: String,
    producer: StreamProducer,
    promote: Script,
}

impl DelayedQueue {
    pub fn new(redis: ConnectionManager, set_name: impl Into<String>, producer: StreamProducer) -> Self {
        Self {
            redis,
            set_name: set_name.into(),
            producer,
            promote: Script::new(PROMOTE_SCRIPT),
        }
    }

    /// Delayed queue feeding the stream described by `S`.
    pub fn from_stream_def<S: StreamDef>(redis: ConnectionManager) -> Self {
        let producer = StreamProducer::from_stream_def::<S>(redis.clone());
        Self::new(redis, S::DELAYED_SET, producer)
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    /// Schedule `job` to be enqueued once `delay` has elapsed.
    pub async fn schedule<J: Serialize>(&self, job: &J, delay: Duration) -> Result<(), StreamError> {
        let due_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        self.schedule_at(job, due_at).await
    }

    /// Schedule `job` to be enqueued at `due_at_ms` (unix milliseconds).
    pub async fn schedule_at<J: Serialize>(&self, job: &J, due_at_ms: i64) -> Result<(), StreamError> {
        let member = encode_member(&serde_json::to_string(job)?);
        let mut conn = self.redis.clone();

        let _: i64 = conn.zadd(&self.set_name, &member, due_at_ms).await?;

        debug!(set = %self.set_name, due_at_ms, "Scheduled delayed job");
        Ok(())
    }

    /// Move up to `limit` due jobs onto the stream. Returns how many were moved.
    pub async fn promote_due(&self, limit: usize) -> Result<usize, StreamError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.redis.clone();

        let due: Vec<String> = conn
            .zrangebyscore_limit(&self.set_name, "-inf", now, 0, limit as isize)
            .await?;

        let mut promoted = 0;
        for member in due {
            let moved: i64 = self
                .promote
                .key(&self.set_name)
                .key(self.producer.stream_name())
                .arg(&member)
                .arg(self.producer.max_length())
                .arg(JOB_FIELD)
                .arg(decode_member(&member))
                .invoke_async(&mut conn)
                .await?;
            // 0: another promoter got there first.
            promoted += moved as usize;
        }

        if promoted > 0 {
            info!(
                set = %self.set_name,
                stream = %self.producer.stream_name(),
                promoted,
                "Promoted delayed jobs"
            );
        }

        Ok(promoted)
    }

    /// Number of jobs currently waiting.
    pub async fn len(&self) -> Result<i64, StreamError> {
        let mut conn = self.redis.clone();
        let count: i64 = conn.zcard(&self.set_name).await?;
        Ok(count)
    }
}

// Sorted set members are unique, so two identical payloads would collapse
// into one. A random prefix keeps every scheduled retry distinct.
fn encode_member(job_json: &str) -> String {
    format!("{}|{}", Uuid::new_v4().simple(), job_json)
}

fn decode_member(member: &str) -> &str {
    member.split_once('|').map_or(member, |(_, json)| json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_round_trip_keeps_payload() {
        let json = r#"{"messageId":"m-1","note":"a|b"}"#;
        let member = encode_member(json);
        assert_ne!(member, json);
        assert_eq!(decode_member(&member), json);
    }

    #[test]
    fn test_identical_payloads_get_distinct_members() {
        assert_ne!(encode_member("{}"), encode_member("{}"));
    }
}
