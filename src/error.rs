//! # Supervisor Errors
//!
//! Error taxonomy for the lifecycle controller and the recovery engine.
//!
//! Only registration errors are surfaced synchronously to callers. Unit
//! operation failures are caught at the boundary and turned into state
//! transitions, failed health checks or failed recovery attempts.

use std::fmt;
use std::time::Duration;

/// Operation invoked on a managed unit, used to tag boundary errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOperation {
    Start,
    Stop,
    Status,
    HealthCheck,
    Hook(&'static str),
}

impl fmt::Display for UnitOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Status => write!(f, "get_status"),
            Self::HealthCheck => write!(f, "health_check"),
            Self::Hook(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SupervisorError {
    /// A unit with the same name is already registered
    #[error("Unit '{0}' is already registered")]
    DuplicateName(String),

    /// The unit could not be constructed; only this registration fails
    #[error("Failed to register unit '{name}': {reason}")]
    Registration { name: String, reason: String },

    #[error("Unit '{0}' is not registered")]
    UnitNotFound(String),

    /// A declared dependency was not running when the unit was scheduled to start
    #[error("Dependency '{dependency}' is not running for unit '{unit}'")]
    DependencyNotSatisfied { unit: String, dependency: String },

    /// A unit's own start/stop/status/health hook returned an error
    #[error("{operation} failed for unit '{unit}': {message}")]
    UnitOperation {
        unit: String,
        operation: UnitOperation,
        message: String,
    },

    #[error("{operation} timeout for unit '{unit}' after {timeout:?}")]
    Timeout {
        unit: String,
        operation: UnitOperation,
        timeout: Duration,
    },

    /// No hook on the unit can carry out the requested recovery action
    #[error("Unit '{unit}' does not support recovery action '{action}'")]
    ActionUnsupported { unit: String, action: String },

    #[error("Recovery rule '{0}' is already registered")]
    DuplicateRule(String),

    #[error("Invalid state for unit '{unit}': {message}")]
    InvalidState { unit: String, message: String },

    #[error("Invalid lifecycle transition for unit '{unit}': {from} -> {to}")]
    InvalidTransition {
        unit: String,
        from: String,
        to: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SupervisorError {
    pub(crate) fn unit_operation(
        unit: &str,
        operation: UnitOperation,
        error: &anyhow::Error,
    ) -> Self {
        Self::UnitOperation {
            unit: unit.to_string(),
            operation,
            message: format!("{error:#}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
