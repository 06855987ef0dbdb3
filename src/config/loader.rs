//! Configuration Loader
//!
//! Layers environment overrides on top of [`SupervisorConfig::default`].
//! Nested keys use `__` as separator, e.g.
//! `SUPERVISOR__LIFECYCLE__FAILURE_THRESHOLD=5` or
//! `SUPERVISOR__RECOVERY__DEFAULT_RULES__ERROR_RATE_THRESHOLD=0.25`.

use config::{Config, Environment};
use tracing::debug;

use super::SupervisorConfig;
use crate::error::{Result, SupervisorError};

/// Environment variable prefix used by [`SupervisorConfig::from_env`]
pub const ENV_PREFIX: &str = "SUPERVISOR";

impl SupervisorConfig {
    /// Defaults overridden by `SUPERVISOR__*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable prefix
    pub fn from_env_with_prefix(prefix: &str) -> Result<Self> {
        let defaults = Config::try_from(&SupervisorConfig::default()).map_err(config_error)?;

        let settings = Config::builder()
            .add_source(defaults)
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        let config: SupervisorConfig = settings.try_deserialize().map_err(config_error)?;
        config.validate()?;

        debug!(
            prefix = prefix,
            health_check_interval_ms = config.lifecycle.health_check_interval_ms,
            poll_interval_ms = config.recovery.poll_interval_ms,
            "Supervisor configuration loaded"
        );

        Ok(config)
    }
}

fn config_error(err: config::ConfigError) -> SupervisorError {
    SupervisorError::Configuration(err.to_string())
}
