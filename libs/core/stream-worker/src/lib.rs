//! Stream Worker Framework
//!
//! A Redis Streams worker framework for multi-stage background pipelines.
//!
//! ## Features
//!
//! - **Generic worker**: `StreamWorker<J, P>` processes any job type, one
//!   message in flight per consumer
//! - **Consumer groups**: Horizontal scaling with Redis consumer groups
//! - **Escalating retries**: `RetryPolicy` decides between an immediate
//!   re-enqueue, a delayed retry through `DelayedQueue`, or giving up
//! - **Prometheus metrics**: Built-in observability
//! - **Health endpoints**: K8s-ready liveness and readiness probes
//!
//! ## Example
//!
//! ```ignore
//! use stream_worker::{StreamWorker, StreamJob, StreamProcessor, StreamDef, WorkerConfig};
//!
//! struct RouteStream;
//! impl StreamDef for RouteStream {
//!     const STREAM_NAME: &'static str = "notifications:route";
//!     const CONSUMER_GROUP: &'static str = "route_workers";
//!     const DELAYED_SET: &'static str = "notifications:route:delayed";
//! }
//!
//! let config = WorkerConfig::from_stream_def::<RouteStream>();
//! let worker = StreamWorker::new(redis, processor, config);
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod consumer;
mod delayed;
mod error;
mod event;
mod health;
pub mod metrics;
mod producer;
mod registry;
mod retry;
mod worker;

pub use config::WorkerConfig;
pub use consumer::{StreamConsumer, StreamInfo};
pub use delayed::DelayedQueue;
pub use error::{ErrorCategory, StreamError};
pub use event::StreamEvent;
pub use health::{health_router, HealthState};
pub use metrics::init_metrics;
pub use producer::{JOB_FIELD, StreamProducer};
pub use registry::{StreamDef, StreamJob, StreamProcessor};
pub use retry::{BackoffSchedule, DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};
pub use worker::StreamWorker;
