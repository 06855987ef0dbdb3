use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a managed unit as tracked by the lifecycle controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Registered but not running (initial and final state)
    #[default]
    Stopped,
    /// `start()` is in flight
    Starting,
    /// Unit started successfully
    Running,
    /// `stop()` is in flight
    Stopping,
    /// Start, stop or dependency check failed
    Error,
}

impl LifecycleState {
    /// Whether this state satisfies a dependent unit's dependency check
    pub fn satisfies_dependencies(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Whether a hook call is currently in flight for the unit
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }

    /// Whether the unit can be removed from the registry
    pub fn is_removable(&self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// Check a transition against the lifecycle cycle
    /// `Stopped -> Starting -> {Running | Error} -> Stopping -> Stopped`.
    ///
    /// A failed dependency check moves a unit to `Error` without passing
    /// through `Starting`, and a failed stop leaves it in `Error`.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::{Error, Running, Starting, Stopped, Stopping};

        matches!(
            (self, next),
            (Stopped, Starting)
                | (Stopped, Error)
                | (Starting, Running)
                | (Starting, Error)
                | (Running, Stopping)
                | (Error, Stopping)
                | (Error, Starting)
                | (Error, Error)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for LifecycleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid lifecycle state: {s}")),
        }
    }
}
