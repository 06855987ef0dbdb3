//! Recovery action vocabulary and its parameters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Free-form parameters passed along with a recovery action
pub type ActionParameters = HashMap<String, Value>;

/// Fixed vocabulary of self-healing actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// `stop()` then `start()`
    RestartService,
    /// Dedicated reset hook, falling back to a restart
    ResetConnection,
    ClearCache,
    ReloadConfig,
    /// Switch the unit to its degraded fallback mode
    FallbackMode,
    /// Audit entry only, never touches the unit
    NotifyAdmin,
}

impl RecoveryAction {
    pub const ALL: [RecoveryAction; 6] = [
        Self::RestartService,
        Self::ResetConnection,
        Self::ClearCache,
        Self::ReloadConfig,
        Self::FallbackMode,
        Self::NotifyAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestartService => "restart_service",
            Self::ResetConnection => "reset_connection",
            Self::ClearCache => "clear_cache",
            Self::ReloadConfig => "reload_config",
            Self::FallbackMode => "fallback_mode",
            Self::NotifyAdmin => "notify_admin",
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecoveryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| format!("Invalid recovery action: {s}"))
    }
}
