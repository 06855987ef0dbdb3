//! # Recovery Action Executor
//!
//! Maps an abstract [`RecoveryAction`] onto whichever hook the target unit
//! declares. The executor never returns an error: unsupported actions,
//! failing hooks and timeouts all become a failed [`ActionOutcome`].

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::actions::{ActionParameters, RecoveryAction};
use crate::config::RecoveryConfig;
use crate::error::{Result, SupervisorError, UnitOperation};
use crate::logging::log_admin_notification;
use crate::unit::{bounded_call, ManagedUnit, UnitLocks};

/// Result of executing one recovery action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActionExecutor {
    restart_pause: Duration,
    reset_pause: Duration,
    action_timeout: Duration,
    locks: UnitLocks,
}

impl ActionExecutor {
    pub fn new(config: &RecoveryConfig, locks: UnitLocks) -> Self {
        Self {
            restart_pause: config.restart_pause(),
            reset_pause: config.reset_pause(),
            action_timeout: config.action_timeout(),
            locks,
        }
    }

    /// Execute `action` against the unit registered as `unit_name`.
    ///
    /// `unit` is `None` when the name is not registered; every action except
    /// `notify_admin` then fails.
    pub async fn execute(
        &self,
        unit_name: &str,
        unit: Option<&Arc<dyn ManagedUnit>>,
        action: RecoveryAction,
        parameters: &ActionParameters,
    ) -> ActionOutcome {
        match self.dispatch(unit_name, unit, action, parameters).await {
            Ok(()) => ActionOutcome::succeeded(),
            Err(err) => {
                debug!(unit = %unit_name, action = %action, error = %err, "Recovery action failed");
                ActionOutcome::failed(err.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        unit_name: &str,
        unit: Option<&Arc<dyn ManagedUnit>>,
        action: RecoveryAction,
        parameters: &ActionParameters,
    ) -> Result<()> {
        if action == RecoveryAction::NotifyAdmin {
            let message = parameters
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unit requires admin attention");
            log_admin_notification(unit_name, message);
            return Ok(());
        }

        let unit = unit.ok_or_else(|| SupervisorError::UnitNotFound(unit_name.to_string()))?;
        let capabilities = unit.capabilities();

        match action {
            RecoveryAction::RestartService => {
                let pause = pause_override(parameters).unwrap_or(self.restart_pause);
                self.stop_then_start(unit_name, unit, pause).await
            }
            RecoveryAction::ResetConnection if capabilities.reset_connection => {
                self.hook(unit_name, "reset_connection", unit.reset_connection())
                    .await
            }
            RecoveryAction::ResetConnection => {
                debug!(unit = %unit_name, "No reset_connection hook, falling back to restart");
                let pause = pause_override(parameters).unwrap_or(self.reset_pause);
                self.stop_then_start(unit_name, unit, pause).await
            }
            RecoveryAction::ClearCache if capabilities.clear_cache => {
                self.hook(unit_name, "clear_cache", unit.clear_cache()).await
            }
            RecoveryAction::ReloadConfig if capabilities.reload_config => {
                self.hook(unit_name, "reload_config", unit.reload_config())
                    .await
            }
            RecoveryAction::FallbackMode if capabilities.fallback => {
                self.hook(unit_name, "enable_fallback", unit.enable_fallback())
                    .await
            }
            _ => {
                debug!(
                    unit = %unit_name,
                    action = %action,
                    hooks = ?capabilities.supported_hooks(),
                    "Unit has no hook for recovery action"
                );
                Err(SupervisorError::ActionUnsupported {
                    unit: unit_name.to_string(),
                    action: action.to_string(),
                })
            }
        }
    }

    async fn stop_then_start(
        &self,
        unit_name: &str,
        unit: &Arc<dyn ManagedUnit>,
        pause: Duration,
    ) -> Result<()> {
        let _guard = self.locks.acquire(unit_name).await;
        bounded_call(unit_name, UnitOperation::Stop, self.action_timeout, unit.stop()).await?;
        tokio::time::sleep(pause).await;
        bounded_call(unit_name, UnitOperation::Start, self.action_timeout, unit.start()).await
    }

    async fn hook<F>(&self, unit_name: &str, hook: &'static str, call: F) -> Result<()>
    where
        F: std::future::Future<Output = anyhow::Result<()>>,
    {
        bounded_call(unit_name, UnitOperation::Hook(hook), self.action_timeout, call).await
    }
}

fn pause_override(parameters: &ActionParameters) -> Option<Duration> {
    parameters
        .get("pause_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
}
