//! A job read off a stream, together with where it came from.

use crate::registry::StreamJob;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct StreamEvent<J: StreamJob> {
    /// Entry ID as assigned by XADD, `<millis>-<seq>`.
    pub entry_id: String,
    pub job: J,
    /// Derived from the entry ID; falls back to the read time.
    pub enqueued_at: DateTime<Utc>,
    /// Taken over from a consumer that went quiet (XCLAIM).
    pub claimed: bool,
}

impl<J: StreamJob> StreamEvent<J> {
    pub fn new(entry_id: String, job: J) -> Self {
        let enqueued_at = entry_time(&entry_id).unwrap_or_else(Utc::now);
        Self {
            entry_id,
            job,
            enqueued_at,
            claimed: false,
        }
    }

    pub fn claimed(self) -> Self {
        Self {
            claimed: true,
            ..self
        }
    }

    pub fn job_id(&self) -> String {
        self.job.job_id()
    }

    /// Time the entry spent in the stream before this read, never negative.
    pub fn queue_lag_ms(&self) -> u64 {
        (Utc::now() - self.enqueued_at).num_milliseconds().max(0) as u64
    }
}

fn entry_time(entry_id: &str) -> Option<DateTime<Utc>> {
    let (millis, _) = entry_id.split_once('-')?;
    DateTime::from_timestamp_millis(millis.parse().ok()?)
}
