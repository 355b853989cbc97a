use core_config::{ConfigError, FromEnv, env_parse};
use std::time::Duration;
use stream_worker::DEFAULT_MAX_RETRIES;

/// Tunables for the prepare, route and status stages.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineConfig {
    /// How long stored routing bundles and events are kept.
    pub bundle_ttl: Duration,
    /// Bundles up to this size travel inline on the stream; 0 stores every
    /// bundle in the bundle store.
    pub inline_bundle_max_bytes: usize,
    /// Delay between delivery-status polls.
    pub status_poll_interval: Duration,
    /// Polls made before a message still reported as sent is left alone.
    pub status_max_polls: u32,
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bundle_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            inline_bundle_max_bytes: 0,
            status_poll_interval: Duration::from_secs(300),
            status_max_polls: 72,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl FromEnv for PipelineConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bundle_ttl: Duration::from_secs(env_parse(
                "NOTIFICATIONS_BUNDLE_TTL_SECS",
                defaults.bundle_ttl.as_secs(),
            )?),
            inline_bundle_max_bytes: env_parse(
                "NOTIFICATIONS_INLINE_BUNDLE_MAX_BYTES",
                defaults.inline_bundle_max_bytes,
            )?,
            status_poll_interval: Duration::from_secs(env_parse(
                "NOTIFICATIONS_STATUS_POLL_INTERVAL_SECS",
                defaults.status_poll_interval.as_secs(),
            )?),
            status_max_polls: env_parse(
                "NOTIFICATIONS_STATUS_MAX_POLLS",
                defaults.status_max_polls,
            )?,
            max_retries: env_parse("NOTIFICATIONS_MAX_RETRIES", defaults.max_retries)?,
        };

        if config.bundle_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "NOTIFICATIONS_BUNDLE_TTL_SECS".to_string(),
                details: "must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 5] = [
        "NOTIFICATIONS_BUNDLE_TTL_SECS",
        "NOTIFICATIONS_INLINE_BUNDLE_MAX_BYTES",
        "NOTIFICATIONS_STATUS_POLL_INTERVAL_SECS",
        "NOTIFICATIONS_STATUS_MAX_POLLS",
        "NOTIFICATIONS_MAX_RETRIES",
    ];

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset(KEYS, || {
            let config = PipelineConfig::from_env().unwrap();
            assert_eq!(config, PipelineConfig::default());
            assert_eq!(config.max_retries, 25);
            assert_eq!(config.inline_bundle_max_bytes, 0);
        });
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("NOTIFICATIONS_BUNDLE_TTL_SECS", Some("60")),
                ("NOTIFICATIONS_INLINE_BUNDLE_MAX_BYTES", Some("4096")),
                ("NOTIFICATIONS_STATUS_POLL_INTERVAL_SECS", Some("30")),
                ("NOTIFICATIONS_STATUS_MAX_POLLS", Some("10")),
                ("NOTIFICATIONS_MAX_RETRIES", Some("3")),
            ],
            || {
                let config = PipelineConfig::from_env().unwrap();
                assert_eq!(config.bundle_ttl, Duration::from_secs(60));
                assert_eq!(config.inline_bundle_max_bytes, 4096);
                assert_eq!(config.status_poll_interval, Duration::from_secs(30));
                assert_eq!(config.status_max_polls, 10);
                assert_eq!(config.max_retries, 3);
            },
        );
    }

    #[test]
    fn test_zero_ttl_rejected() {
        temp_env::with_var("NOTIFICATIONS_BUNDLE_TTL_SECS", Some("0"), || {
            let err = PipelineConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        });
    }

    #[test]
    fn test_garbage_rejected() {
        temp_env::with_var("NOTIFICATIONS_MAX_RETRIES", Some("lots"), || {
            assert!(PipelineConfig::from_env().is_err());
        });
    }
}
