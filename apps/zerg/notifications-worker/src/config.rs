use core_config::server::ServerConfig;
use core_config::{ConfigError, FromEnv, env_or_default};
use strum::{Display, EnumString};

/// Which pipeline stage(s) this process consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum WorkerStage {
    Prepare,
    Route,
    Status,
    All,
}

impl WorkerStage {
    pub fn includes(&self, stage: WorkerStage) -> bool {
        *self == WorkerStage::All || *self == stage
    }
}

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub stage: WorkerStage,
    pub health: ServerConfig,
}

impl FromEnv for WorkerSettings {
    /// - WORKER_STAGE: prepare, route, status or all (default)
    /// - HEALTH_HOST / HEALTH_PORT: see [`ServerConfig`]
    fn from_env() -> Result<Self, ConfigError> {
        let raw = env_or_default("WORKER_STAGE", "all");
        let stage = raw
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "WORKER_STAGE".to_string(),
                details: format!("'{}' is not one of prepare, route, status, all", raw),
            })?;

        Ok(Self {
            stage,
            health: ServerConfig::from_env()?,
        })
    }
}
