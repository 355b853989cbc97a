//! Notifications Worker Service
//!
//! Runs the notification pipeline stages as Redis stream consumers.
//!
//! ## Architecture
//!
//! ```text
//! notifications:prepare ─▶ PrepareProcessor ─▶ notifications:route
//! notifications:route   ─▶ RouteProcessor   ─▶ provider (+ notifications:status)
//! notifications:status  ─▶ StatusProcessor  ─▶ notifications:status (re-poll)
//!                                    │
//!                                    ▼
//!                           notifications:audit
//! ```
//!
//! `WORKER_STAGE` picks which consumers this process runs so each stage can be
//! scaled on its own.

pub mod config;

use axum::Router;
use core_config::redis::RedisConfig;
use core_config::server::ServerConfig;
use core_config::{Environment, FromEnv, app_info};
use domain_notifications::{
    AuditSink, BundleStore, DeliveryStatusPoller, FanoutAuditSink, HandlebarsRenderer,
    PipelineConfig, PrepareProcessor, PrepareStage, PrepareStream, ProviderDispatcher,
    ProviderRegistry, RedisBundleStore, RedisCatalog, RouteProcessor, RouteStage, RouteStream,
    StatusProcessor, StatusQueue, StatusStream, StreamAuditSink, StreamRouteQueue,
    StreamStatusQueue, TracingAuditSink,
};
use eyre::{Result, WrapErr, eyre};
use redis::Client;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{
    HealthState, RetryPolicy, StreamError, StreamJob, StreamProcessor, StreamWorker, WorkerConfig,
    health_router, init_metrics,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{WorkerSettings, WorkerStage};

const CONNECT_ATTEMPTS: u32 = 5;

/// Start the health HTTP server
///
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Stream monitoring: `/stream/info`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, server: ServerConfig) -> Result<()> {
    let app: Router = health_router(health_state);

    let addr = server.address();
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(address = %addr, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Connect to Redis and PING, retrying with exponential backoff.
async fn connect_with_retry(url: &str) -> Result<ConnectionManager> {
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;
    loop {
        match connect(url).await {
            Ok(manager) => return Ok(manager),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "Redis connection failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e).wrap_err("Failed to connect to Redis"),
        }
    }
}

async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;
    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(manager)
}

/// Everything the stage processors share.
struct Components {
    redis: ConnectionManager,
    pipeline: PipelineConfig,
    catalog: Arc<RedisCatalog>,
    bundles: Arc<dyn BundleStore>,
    status_queue: Arc<dyn StatusQueue>,
    audit: Arc<dyn AuditSink>,
    registry: ProviderRegistry,
}

impl Components {
    fn new(redis: ConnectionManager, pipeline: PipelineConfig) -> Result<Self> {
        let audit = FanoutAuditSink::new()
            .with_sink(Arc::new(StreamAuditSink::new(redis.clone())))
            .with_sink(Arc::new(TracingAuditSink));

        let registry =
            ProviderRegistry::with_defaults().wrap_err("Failed to build provider HTTP client")?;

        Ok(Self {
            catalog: Arc::new(RedisCatalog::new(redis.clone())),
            bundles: Arc::new(RedisBundleStore::new(redis.clone(), pipeline.bundle_ttl)),
            status_queue: Arc::new(StreamStatusQueue::new(redis.clone())),
            audit: Arc::new(audit),
            registry,
            redis,
            pipeline,
        })
    }

    fn prepare_processor(&self) -> PrepareProcessor {
        let stage = PrepareStage::new(
            self.catalog.clone(),
            self.catalog.clone(),
            self.bundles.clone(),
            Arc::new(StreamRouteQueue::new(self.redis.clone())),
            self.pipeline.clone(),
        );
        PrepareProcessor::new(stage, self.audit.clone())
    }

    fn route_processor(&self) -> RouteProcessor {
        let dispatcher = ProviderDispatcher::new(
            self.audit.clone(),
            self.status_queue.clone(),
            self.pipeline.status_poll_interval,
        );
        let stage = RouteStage::new(
            self.bundles.clone(),
            self.registry.clone(),
            Arc::new(HandlebarsRenderer::new()),
            dispatcher,
            self.audit.clone(),
        );
        RouteProcessor::new(stage, self.audit.clone())
    }

    fn status_processor(&self) -> StatusProcessor {
        let poller = DeliveryStatusPoller::new(
            self.catalog.clone(),
            self.registry.clone(),
            self.pipeline.status_poll_interval,
        );
        StatusProcessor::new(
            poller,
            self.status_queue.clone(),
            self.audit.clone(),
            self.pipeline.status_max_polls,
        )
    }
}

/// Consumers started by this process.
struct Workers {
    redis: ConnectionManager,
    retry_policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
    tasks: JoinSet<(&'static str, Result<(), StreamError>)>,
    streams: Vec<WorkerConfig>,
}

impl Workers {
    fn spawn<J, P>(&mut self, name: &'static str, processor: P, config: WorkerConfig)
    where
        J: StreamJob + 'static,
        P: StreamProcessor<J> + 'static,
    {
        // ConnectionManager multiplexes a single connection, so blocking
        // XREADGROUP would stall the worker's other commands.
        let config = config.with_blocking(None);
        info!(
            stage = name,
            stream = %config.stream_name,
            consumer_group = %config.consumer_group,
            consumer_id = %config.consumer_id,
            "Starting stage worker"
        );
        self.streams.push(config.clone());

        let worker = StreamWorker::<J, P>::new(self.redis.clone(), Arc::new(processor), config)
            .with_retry_policy(self.retry_policy);
        let shutdown = self.shutdown.clone();
        self.tasks
            .spawn(async move { (name, worker.run(shutdown).await) });
    }
}

/// Run the notifications worker
///
/// 1. Sets up structured logging and the Prometheus recorder
/// 2. Loads configuration and connects to Redis
/// 3. Starts one stream worker per selected stage
/// 4. Serves health endpoints until shutdown
pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    init_metrics().wrap_err("Failed to install metrics recorder")?;

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, ?environment, "Starting notifications worker");

    let settings = WorkerSettings::from_env().wrap_err("Failed to load worker settings")?;
    let pipeline = PipelineConfig::from_env().wrap_err("Failed to load pipeline configuration")?;
    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis configuration")?;

    info!("Connecting to Redis...");
    let redis = connect_with_retry(&redis_config.url).await?;
    info!("Connected to Redis successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let components = Components::new(redis.clone(), pipeline.clone())?;
    let mut workers = Workers {
        redis: redis.clone(),
        retry_policy: RetryPolicy::new(pipeline.max_retries),
        shutdown: shutdown_rx,
        tasks: JoinSet::new(),
        streams: Vec::new(),
    };

    if settings.stage.includes(WorkerStage::Prepare) {
        workers.spawn(
            "prepare",
            components.prepare_processor(),
            WorkerConfig::from_stream_def::<PrepareStream>(),
        );
    }
    if settings.stage.includes(WorkerStage::Route) {
        workers.spawn(
            "route",
            components.route_processor(),
            WorkerConfig::from_stream_def::<RouteStream>(),
        );
    }
    if settings.stage.includes(WorkerStage::Status) {
        workers.spawn(
            "status",
            components.status_processor(),
            WorkerConfig::from_stream_def::<StatusStream>(),
        );
    }

    let health_state = workers.streams.iter().cloned().fold(
        HealthState::new(redis, app_info.name, app_info.version),
        HealthState::with_stream,
    );
    let health_server = settings.health.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_server).await {
            error!(error = %e, "Health server failed");
        }
    });

    while let Some(joined) = workers.tasks.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!(stage = name, "Stage worker stopped"),
            Ok((name, Err(e))) => {
                error!(stage = name, error = %e, "Stage worker failed");
                return Err(eyre!("{} worker failed: {}", name, e));
            }
            Err(e) => return Err(e).wrap_err("Stage worker panicked"),
        }
    }

    info!("Notifications worker stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }
}
