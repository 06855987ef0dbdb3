//! # Unit Status Snapshots
//!
//! Point-in-time health reads of a managed unit. Snapshots are recomputed
//! on every poll and are never stored by the supervisor beyond one cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::state_machine::LifecycleState;

/// Health reported by (or synthesized for) a managed unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Functional with reduced quality (high latency, partial features)
    Degraded,
    Unhealthy,
    /// Not running or not reachable
    Offline,
    /// Status could not be acquired at all
    Error,
    /// The unit does not report status
    Unknown,
}

impl HealthState {
    /// Check if the unit is usable by its dependents
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Severity used when folding many unit states into one (0 = healthy)
    pub fn severity_level(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Unknown => 1,
            Self::Degraded => 4,
            Self::Unhealthy => 7,
            Self::Offline => 8,
            Self::Error => 10,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for HealthState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "unhealthy" => Ok(Self::Unhealthy),
            "offline" => Ok(Self::Offline),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid health state: {s}")),
        }
    }
}

/// Point-in-time read of a unit's health, error and detail state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub unit_name: String,
    pub health: HealthState,
    pub error: Option<String>,
    /// Free-form metrics reported by the unit (`error_rate`, `memory_usage`, ...)
    #[serde(default)]
    pub details: HashMap<String, Value>,
    pub checked_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(unit_name: impl Into<String>, health: HealthState) -> Self {
        Self {
            unit_name: unit_name.into(),
            health,
            error: None,
            details: HashMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn healthy(unit_name: impl Into<String>) -> Self {
        Self::new(unit_name, HealthState::Healthy)
    }

    pub fn offline(unit_name: impl Into<String>) -> Self {
        Self::new(unit_name, HealthState::Offline)
    }

    /// Snapshot for a unit whose status call failed or hung
    pub fn acquisition_failed(unit_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(unit_name, HealthState::Error).with_error(error)
    }

    /// Synthesized snapshot for units that do not report their own status
    pub fn from_lifecycle(unit_name: impl Into<String>, state: LifecycleState) -> Self {
        let health = if state == LifecycleState::Running {
            HealthState::Healthy
        } else {
            HealthState::Offline
        };
        Self::new(unit_name, health).with_detail("state", state.to_string())
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Numeric detail value, if present and numeric
    pub fn detail_f64(&self, key: &str) -> Option<f64> {
        self.details.get(key).and_then(Value::as_f64)
    }

    /// Case-insensitive substring match against the reported error
    pub fn error_contains(&self, needle: &str) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.to_lowercase().contains(&needle.to_lowercase()))
    }
}
