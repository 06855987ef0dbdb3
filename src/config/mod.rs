//! # Supervisor Configuration
//!
//! Polling intervals, failure thresholds, timeouts and default recovery
//! rule parameters. The host builds a [`SupervisorConfig`] (usually
//! [`Default`] plus overrides, or [`SupervisorConfig::from_env`]) and hands
//! it to the controller and engine at construction. No configuration file
//! format is owned here.
//!
//! Durations are stored as integer milliseconds so they survive environment
//! overrides, and exposed as [`Duration`] through accessor methods.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, SupervisorError};

pub use loader::ENV_PREFIX;

/// Root configuration for both supervision subsystems
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Lifecycle controller and health monitor settings
    pub lifecycle: LifecycleConfig,

    /// Recovery engine, action executor and default rule settings
    pub recovery: RecoveryConfig,
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        self.lifecycle.validate()?;
        self.recovery.validate()
    }
}

/// Lifecycle controller configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    /// Consecutive failed health checks before a restart is triggered
    pub failure_threshold: u32,
    /// Pause between stop and start during a restart
    pub restart_settle_ms: u64,
    pub start_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    pub status_timeout_ms: u64,
    /// Sleep after a health cycle that failed as a whole
    pub loop_error_backoff_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: 30_000,
            health_check_timeout_ms: 10_000,
            failure_threshold: 3,
            restart_settle_ms: 1_000,
            start_timeout_ms: 30_000,
            stop_timeout_ms: 30_000,
            status_timeout_ms: 5_000,
            loop_error_backoff_ms: 5_000,
        }
    }
}

impl LifecycleConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn loop_error_backoff(&self) -> Duration {
        Duration::from_millis(self.loop_error_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        non_zero("lifecycle.health_check_interval_ms", self.health_check_interval_ms)?;
        non_zero("lifecycle.health_check_timeout_ms", self.health_check_timeout_ms)?;
        non_zero("lifecycle.start_timeout_ms", self.start_timeout_ms)?;
        non_zero("lifecycle.stop_timeout_ms", self.stop_timeout_ms)?;
        non_zero("lifecycle.status_timeout_ms", self.status_timeout_ms)?;
        if self.failure_threshold == 0 {
            return Err(SupervisorError::Configuration(
                "lifecycle.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Attempt limiting for one of the built-in recovery rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RulePolicyConfig {
    pub max_attempts: u32,
    pub cooldown_ms: u64,
    pub priority: i32,
}

impl RulePolicyConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Thresholds and policies of the built-in recovery rule set
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultRulesConfig {
    /// `details.error_rate` above this triggers a connection reset
    pub error_rate_threshold: f64,
    /// `details.memory_usage` (bytes) above this triggers a restart
    pub memory_threshold_bytes: u64,
    pub offline_restart: RulePolicyConfig,
    pub memory_restart: RulePolicyConfig,
    pub error_rate_reset: RulePolicyConfig,
    pub timeout_reset: RulePolicyConfig,
    pub config_reload: RulePolicyConfig,
}

impl Default for DefaultRulesConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.5,
            memory_threshold_bytes: 1024 * 1024 * 1024,
            offline_restart: RulePolicyConfig {
                max_attempts: 3,
                cooldown_ms: 30_000,
                priority: 10,
            },
            memory_restart: RulePolicyConfig {
                max_attempts: 1,
                cooldown_ms: 300_000,
                priority: 9,
            },
            error_rate_reset: RulePolicyConfig {
                max_attempts: 2,
                cooldown_ms: 60_000,
                priority: 8,
            },
            timeout_reset: RulePolicyConfig {
                max_attempts: 3,
                cooldown_ms: 15_000,
                priority: 7,
            },
            config_reload: RulePolicyConfig {
                max_attempts: 2,
                cooldown_ms: 30_000,
                priority: 6,
            },
        }
    }
}

/// Recovery engine configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub poll_interval_ms: u64,
    pub status_timeout_ms: u64,
    /// Upper bound for any single recovery hook call
    pub action_timeout_ms: u64,
    /// Pause between stop and start for `restart_service`
    pub restart_pause_ms: u64,
    /// Pause between stop and start when `reset_connection` falls back to a restart
    pub reset_pause_ms: u64,
    /// Attempts older than this are pruned from the history
    pub history_retention_ms: u64,
    pub loop_error_backoff_ms: u64,
    pub install_default_rules: bool,
    pub default_rules: DefaultRulesConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            status_timeout_ms: 5_000,
            action_timeout_ms: 60_000,
            restart_pause_ms: 1_000,
            reset_pause_ms: 500,
            history_retention_ms: 3_600_000,
            loop_error_backoff_ms: 5_000,
            install_default_rules: true,
            default_rules: DefaultRulesConfig::default(),
        }
    }
}

impl RecoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }

    pub fn reset_pause(&self) -> Duration {
        Duration::from_millis(self.reset_pause_ms)
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_millis(self.history_retention_ms)
    }

    pub fn loop_error_backoff(&self) -> Duration {
        Duration::from_millis(self.loop_error_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        non_zero("recovery.poll_interval_ms", self.poll_interval_ms)?;
        non_zero("recovery.status_timeout_ms", self.status_timeout_ms)?;
        non_zero("recovery.action_timeout_ms", self.action_timeout_ms)?;
        non_zero("recovery.history_retention_ms", self.history_retention_ms)?;

        let rules = &self.default_rules;
        if !(0.0..=1.0).contains(&rules.error_rate_threshold) {
            return Err(SupervisorError::Configuration(format!(
                "recovery.default_rules.error_rate_threshold must be within 0.0..=1.0, got {}",
                rules.error_rate_threshold
            )));
        }

        // A cooldown longer than the retention window would forget attempts
        // that still count against max_attempts.
        let longest_cooldown = [
            rules.offline_restart,
            rules.memory_restart,
            rules.error_rate_reset,
            rules.timeout_reset,
            rules.config_reload,
        ]
        .iter()
        .map(|policy| policy.cooldown_ms)
        .max()
        .unwrap_or_default();
        if longest_cooldown > self.history_retention_ms {
            return Err(SupervisorError::Configuration(format!(
                "recovery.history_retention_ms ({}) is shorter than the longest rule cooldown ({longest_cooldown})",
                self.history_retention_ms
            )));
        }
        Ok(())
    }
}

fn non_zero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(SupervisorError::Configuration(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}
