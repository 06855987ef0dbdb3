//! Unit table owned by the lifecycle controller.
//!
//! Records are only mutated through this type, and every state change goes
//! through [`UnitRegistry::transition`] so illegal transitions are rejected
//! in one place. The table lock is never held across an `.await`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, SupervisorError};
use crate::logging::log_state_transition;
use crate::state_machine::LifecycleState;
use crate::unit::{ManagedUnit, UnitCapabilities};

/// Startup rank given to units registered without one
pub const DEFAULT_STARTUP_RANK: i32 = 100;

/// Registry entry for one managed unit
pub struct UnitRecord {
    pub name: String,
    pub handle: Arc<dyn ManagedUnit>,
    pub state: LifecycleState,
    /// Declared dependencies, deduplicated, in declaration order
    pub dependencies: Vec<String>,
    pub startup_rank: i32,
    pub registration_seq: u64,
    pub consecutive_health_failures: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restart_count: u32,
}

impl UnitRecord {
    fn new(
        name: String,
        handle: Arc<dyn ManagedUnit>,
        dependencies: &[&str],
        startup_rank: i32,
        registration_seq: u64,
    ) -> Self {
        let mut deduped: Vec<String> = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if !deduped.iter().any(|d| d == dependency) {
                deduped.push((*dependency).to_string());
            }
        }

        Self {
            name,
            handle,
            state: LifecycleState::Stopped,
            dependencies: deduped,
            startup_rank,
            registration_seq,
            consecutive_health_failures: 0,
            last_health_check: None,
            last_error: None,
            restart_count: 0,
        }
    }

    pub fn info(&self) -> UnitInfo {
        UnitInfo {
            name: self.name.clone(),
            state: self.state,
            dependencies: self.dependencies.clone(),
            startup_rank: self.startup_rank,
            consecutive_health_failures: self.consecutive_health_failures,
            last_health_check: self.last_health_check,
            last_error: self.last_error.clone(),
            restart_count: self.restart_count,
            capabilities: self.handle.capabilities(),
        }
    }
}

/// Read-only copy of a [`UnitRecord`] for hosts and tests
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitInfo {
    pub name: String,
    pub state: LifecycleState,
    pub dependencies: Vec<String>,
    pub startup_rank: i32,
    pub consecutive_health_failures: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub capabilities: UnitCapabilities,
}

/// Result of recording one failed health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthFailure {
    /// Consecutive failures including this one
    pub consecutive: u32,
    /// The threshold was reached; the counter has already been reset
    pub threshold_reached: bool,
}

#[derive(Default)]
pub struct UnitRegistry {
    records: RwLock<HashMap<String, UnitRecord>>,
    next_seq: AtomicU64,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        name: &str,
        handle: Arc<dyn ManagedUnit>,
        dependencies: &[&str],
        startup_rank: i32,
    ) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(name) {
            return Err(SupervisorError::DuplicateName(name.to_string()));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        records.insert(
            name.to_string(),
            UnitRecord::new(name.to_string(), handle, dependencies, startup_rank, seq),
        );
        Ok(())
    }

    /// Remove a unit that is not mid-transition or running
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get(name)
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))?;
        if !record.state.is_removable() {
            return Err(SupervisorError::InvalidState {
                unit: name.to_string(),
                message: format!("cannot unregister while {}", record.state),
            });
        }
        records.remove(name);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.read().contains_key(name)
    }

    pub fn handle(&self, name: &str) -> Result<Arc<dyn ManagedUnit>> {
        self.records
            .read()
            .get(name)
            .map(|record| record.handle.clone())
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))
    }

    pub fn state(&self, name: &str) -> Result<LifecycleState> {
        self.records
            .read()
            .get(name)
            .map(|record| record.state)
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))
    }

    pub fn info(&self, name: &str) -> Result<UnitInfo> {
        self.records
            .read()
            .get(name)
            .map(UnitRecord::info)
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))
    }

    /// Names sorted alphabetically
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Startup order: rank ascending, registration order within a rank
    pub fn start_order(&self) -> Vec<String> {
        let records = self.records.read();
        let mut ordered: Vec<&UnitRecord> = records.values().collect();
        ordered.sort_by_key(|record| (record.startup_rank, record.registration_seq));
        ordered.into_iter().map(|record| record.name.clone()).collect()
    }

    /// First declared dependency that is not Running (or not registered)
    pub fn unsatisfied_dependency(&self, name: &str) -> Result<Option<String>> {
        let records = self.records.read();
        let record = records
            .get(name)
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))?;

        Ok(record
            .dependencies
            .iter()
            .find(|dependency| {
                !records
                    .get(dependency.as_str())
                    .is_some_and(|dep| dep.state.satisfies_dependencies())
            })
            .cloned())
    }

    /// Move a unit to `to`, returning the previous state.
    ///
    /// Entering `Error` stores `reason` as the unit's last error; entering
    /// `Running` clears it and resets the health failure counter.
    pub fn transition(
        &self,
        name: &str,
        to: LifecycleState,
        reason: Option<&str>,
    ) -> Result<LifecycleState> {
        let from = {
            let mut records = self.records.write();
            let record = records
                .get_mut(name)
                .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))?;

            let from = record.state;
            if !from.can_transition_to(to) {
                return Err(SupervisorError::InvalidTransition {
                    unit: name.to_string(),
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }

            record.state = to;
            match to {
                LifecycleState::Error => record.last_error = reason.map(str::to_string),
                LifecycleState::Running => {
                    record.last_error = None;
                    record.consecutive_health_failures = 0;
                }
                _ => {}
            }
            from
        };

        log_state_transition(name, from, to, reason);
        Ok(from)
    }

    /// Running units that declare a health check
    pub fn health_check_targets(&self) -> Vec<(String, Arc<dyn ManagedUnit>)> {
        let records = self.records.read();
        let mut targets: Vec<(String, Arc<dyn ManagedUnit>)> = records
            .values()
            .filter(|record| record.state == LifecycleState::Running)
            .filter(|record| record.handle.capabilities().health_check)
            .map(|record| (record.name.clone(), record.handle.clone()))
            .collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        targets
    }

    pub fn record_health_success(&self, name: &str) {
        if let Some(record) = self.records.write().get_mut(name) {
            record.consecutive_health_failures = 0;
            record.last_health_check = Some(Utc::now());
        }
    }

    /// Count a failed check; at `threshold` the counter resets to zero.
    /// `None` if the unit was unregistered in the meantime.
    pub fn record_health_failure(&self, name: &str, threshold: u32) -> Option<HealthFailure> {
        let mut records = self.records.write();
        let record = records.get_mut(name)?;

        record.last_health_check = Some(Utc::now());
        record.consecutive_health_failures += 1;
        let consecutive = record.consecutive_health_failures;
        let threshold_reached = consecutive >= threshold;
        if threshold_reached {
            record.consecutive_health_failures = 0;
        }

        Some(HealthFailure {
            consecutive,
            threshold_reached,
        })
    }

    pub fn increment_restart_count(&self, name: &str) -> Result<u32> {
        let mut records = self.records.write();
        let record = records
            .get_mut(name)
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))?;
        record.restart_count += 1;
        Ok(record.restart_count)
    }
}
