//! # Managed Units
//!
//! The uniform lifecycle surface every supervised subsystem exposes.
//!
//! Every unit can be started and stopped. Everything else (status reporting,
//! health checks and the recovery hooks) is optional and is declared up front
//! through [`UnitCapabilities`]. The supervisor never calls a hook the unit
//! has not declared, so the default method bodies are only a safety net.
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use supervisor_core::unit::{ManagedUnit, UnitCapabilities};
//!
//! struct SpeechEngine;
//!
//! #[async_trait]
//! impl ManagedUnit for SpeechEngine {
//!     async fn start(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     async fn stop(&self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn capabilities(&self) -> UnitCapabilities {
//!         UnitCapabilities::none().with_health_check()
//!     }
//!
//!     async fn health_check(&self) -> anyhow::Result<bool> {
//!         Ok(true)
//!     }
//! }
//! ```

pub mod locks;
pub mod status;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SupervisorError, UnitOperation};

pub use locks::UnitLocks;
pub use status::{HealthState, StatusSnapshot};

/// Optional parts of the lifecycle surface a unit supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCapabilities {
    pub status: bool,
    pub health_check: bool,
    pub reset_connection: bool,
    pub clear_cache: bool,
    pub reload_config: bool,
    pub fallback: bool,
}

impl UnitCapabilities {
    /// Only `start` and `stop`
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            status: true,
            health_check: true,
            reset_connection: true,
            clear_cache: true,
            reload_config: true,
            fallback: true,
        }
    }

    pub fn with_status(mut self) -> Self {
        self.status = true;
        self
    }

    pub fn with_health_check(mut self) -> Self {
        self.health_check = true;
        self
    }

    pub fn with_reset_connection(mut self) -> Self {
        self.reset_connection = true;
        self
    }

    pub fn with_clear_cache(mut self) -> Self {
        self.clear_cache = true;
        self
    }

    pub fn with_reload_config(mut self) -> Self {
        self.reload_config = true;
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    /// Names of the declared optional hooks, for status details and logs
    pub fn supported_hooks(&self) -> Vec<&'static str> {
        [
            (self.status, "get_status"),
            (self.health_check, "health_check"),
            (self.reset_connection, "reset_connection"),
            (self.clear_cache, "clear_cache"),
            (self.reload_config, "reload_config"),
            (self.fallback, "enable_fallback"),
        ]
        .into_iter()
        .filter_map(|(declared, name)| declared.then_some(name))
        .collect()
    }
}

/// Run one unit hook under a deadline, converting its error at the boundary.
///
/// On timeout the call is dropped (abandoned), never forcibly killed.
pub(crate) async fn bounded_call<T, F>(
    unit: &str,
    operation: UnitOperation,
    limit: Duration,
    call: F,
) -> Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(SupervisorError::unit_operation(unit, operation, &err)),
        Err(_) => Err(SupervisorError::Timeout {
            unit: unit.to_string(),
            operation,
            timeout: limit,
        }),
    }
}

fn undeclared(hook: &str) -> anyhow::Error {
    anyhow::anyhow!("hook '{hook}' is not declared by this unit")
}

/// Lifecycle surface of a supervised subsystem
///
/// Errors returned from any method are caught by the supervisor and turned
/// into state transitions or failed checks; they never escape a loop.
#[async_trait]
pub trait ManagedUnit: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Optional hooks this unit implements
    fn capabilities(&self) -> UnitCapabilities {
        UnitCapabilities::none()
    }

    /// Current status; only called when `capabilities().status` is set.
    /// The supervisor overwrites `unit_name` with the registered name.
    async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        Err(undeclared("get_status"))
    }

    /// Liveness probe; only called when `capabilities().health_check` is set
    async fn health_check(&self) -> anyhow::Result<bool> {
        Err(undeclared("health_check"))
    }

    async fn reset_connection(&self) -> anyhow::Result<()> {
        Err(undeclared("reset_connection"))
    }

    async fn clear_cache(&self) -> anyhow::Result<()> {
        Err(undeclared("clear_cache"))
    }

    async fn reload_config(&self) -> anyhow::Result<()> {
        Err(undeclared("reload_config"))
    }

    async fn enable_fallback(&self) -> anyhow::Result<()> {
        Err(undeclared("enable_fallback"))
    }
}
