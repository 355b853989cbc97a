//! Outbound queues used by the pipeline stages.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_worker::{DelayedQueue, StreamProducer};

use crate::error::{NotificationError, NotificationResult};
use crate::messages::{RoutingUnit, StatusCheckJob};
use crate::streams::{RouteStream, StatusStream};

/// Hands routing units to the route stage.
#[async_trait]
pub trait RouteQueue: Send + Sync {
    async fn enqueue(&self, unit: &RoutingUnit) -> NotificationResult<()>;
}

/// Schedules delivery-status polls.
#[async_trait]
pub trait StatusQueue: Send + Sync {
    async fn schedule(&self, job: &StatusCheckJob, delay: Duration) -> NotificationResult<()>;
}

#[derive(Clone)]
pub struct StreamRouteQueue {
    producer: StreamProducer,
}

impl StreamRouteQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            producer: StreamProducer::from_stream_def::<RouteStream>(redis),
        }
    }
}

#[async_trait]
impl RouteQueue for StreamRouteQueue {
    async fn enqueue(&self, unit: &RoutingUnit) -> NotificationResult<()> {
        self.producer.send(unit).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct StreamStatusQueue {
    producer: StreamProducer,
    delayed: DelayedQueue,
}

impl StreamStatusQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            producer: StreamProducer::from_stream_def::<StatusStream>(redis.clone()),
            delayed: DelayedQueue::from_stream_def::<StatusStream>(redis),
        }
    }
}

#[async_trait]
impl StatusQueue for StreamStatusQueue {
    async fn schedule(&self, job: &StatusCheckJob, delay: Duration) -> NotificationResult<()> {
        if delay.is_zero() {
            self.producer.send(job).await?;
        } else {
            self.delayed.schedule(job, delay).await?;
        }
        Ok(())
    }
}

/// Records everything it is given (for development/testing)
#[derive(Debug, Clone)]
pub struct RecordingQueue<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for RecordingQueue<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> RecordingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<T> {
        self.items.lock().map(|i| i.clone()).unwrap_or_default()
    }

    fn push(&self, item: T) -> NotificationResult<()> {
        self.items
            .lock()
            .map_err(|e| NotificationError::Queue(e.to_string()))?
            .push(item);
        Ok(())
    }
}

#[async_trait]
impl RouteQueue for RecordingQueue<RoutingUnit> {
    async fn enqueue(&self, unit: &RoutingUnit) -> NotificationResult<()> {
        self.push(unit.clone())
    }
}

#[async_trait]
impl StatusQueue for RecordingQueue<(StatusCheckJob, Duration)> {
    async fn schedule(&self, job: &StatusCheckJob, delay: Duration) -> NotificationResult<()> {
        self.push((job.clone(), delay))
    }
}
