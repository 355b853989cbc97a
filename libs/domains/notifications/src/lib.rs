//! Notifications Domain
//!
//! Routing and delivery pipeline for multi-channel notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  PrepareStream  │  ← one event for one recipient
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │  PrepareStage   │  ← load notification, filter, expand into units
//! └────────┬────────┘
//!          │  RoutingUnit + stored RoutingBundle
//! ┌────────▼────────┐
//! │   RouteStream   │
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │   RouteStage    │  ← preferences, channel/provider selection, render
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │    Provider     │  ← SendGrid, Mailgun, Twilio
//! └────────┬────────┘
//!          │  polling providers only
//! ┌────────▼────────┐
//! │  StatusStream   │  ← DeliveryStatusPoller
//! └─────────────────┘
//! ```
//!
//! Every stage outcome is written to an [`AuditSink`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{PrepareProcessor, PrepareStage, PrepareStream};
//! use stream_worker::{StreamWorker, WorkerConfig};
//!
//! let processor = PrepareProcessor::new(stage, audit);
//! let worker = StreamWorker::new(redis, Arc::new(processor), WorkerConfig::from_stream_def::<PrepareStream>());
//! worker.run(shutdown_rx).await?;
//! ```

pub mod audit;
pub mod bundle;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod merge;
pub mod messages;
pub mod models;
pub mod outcome;
pub mod preferences;
pub mod prepare;
pub mod processor;
pub mod providers;
pub mod queue;
pub mod repository;
pub mod route;
pub mod status;
pub mod streams;
pub mod templates;

// Re-export commonly used types
pub use audit::{
    AuditEvent, AuditKind, AuditSink, FanoutAuditSink, InMemoryAuditSink, StreamAuditSink,
    TracingAuditSink,
};
pub use bundle::{BundleStore, InMemoryBundleStore, RedisBundleStore};
pub use config::PipelineConfig;
pub use dispatch::ProviderDispatcher;
pub use error::{NotificationError, NotificationResult};
pub use filter::{Filter, FilterContext};
pub use messages::{ChannelSummary, MessageLocation, PrepareJob, RoutingBundle, RoutingUnit, StatusCheckJob};
pub use models::{Channel, Configuration, DeliveryStatus, Notification, ReasonCode, Scope};
pub use outcome::StageOutcome;
pub use preferences::{Deliverability, PreferenceResolver};
pub use prepare::PrepareStage;
pub use processor::{PrepareProcessor, RouteProcessor, StatusProcessor};
pub use providers::{Provider, ProviderRegistry};
pub use queue::{RouteQueue, StatusQueue, StreamRouteQueue, StreamStatusQueue};
pub use repository::{ConfigurationRepository, InMemoryCatalog, NotificationRepository, RedisCatalog};
pub use route::RouteStage;
pub use status::DeliveryStatusPoller;
pub use streams::{AuditStream, PrepareStream, RouteStream, StatusStream};
pub use templates::{ContentRenderer, HandlebarsRenderer, RenderedContent};
