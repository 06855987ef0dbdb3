//! # Lifecycle Controller
//!
//! Owns the unit registry, brings units up in startup-rank order behind a
//! dependency check, takes them down in reverse, and runs the periodic
//! health monitor that restarts units after repeated failed checks.
//!
//! ## Start semantics
//!
//! Units start in ascending `startup_rank`, ties broken by registration
//! order. Before a unit is moved to `Starting` every declared dependency
//! must be `Running`; otherwise the unit goes straight to `Error` and its
//! `start()` is never called. With `allow_partial_failure == false` the
//! first failure aborts the pass: no further `start()` calls are made, and
//! remaining units whose dependencies are not running are marked `Error`.
//!
//! ## Concurrency
//!
//! Start, stop and restart of one unit take that unit's [`UnitLocks`] entry.
//! Pass the same table to a [`RecoveryEngine`](crate::recovery::RecoveryEngine)
//! through [`LifecycleController::with_unit_locks`] so both subsystems take
//! turns on the same unit.

mod monitor;
pub mod registry;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::error::{Result, SupervisorError, UnitOperation};
use crate::state_machine::LifecycleState;
use crate::unit::{bounded_call, HealthState, ManagedUnit, StatusSnapshot, UnitLocks};

pub use registry::{HealthFailure, UnitInfo, UnitRecord, UnitRegistry, DEFAULT_STARTUP_RANK};

/// Outcome of a `start_all` pass
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    /// Order the pass used
    pub order: Vec<String>,
    /// Units running at the end of the pass (including already running ones)
    pub started: Vec<String>,
    pub failed: Vec<(String, SupervisorError)>,
    /// The pass stopped at the first failure
    pub aborted: bool,
    pub allow_partial_failure: bool,
}

impl StartReport {
    /// No failures, or failures the caller chose to tolerate
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty() || self.allow_partial_failure
    }

    pub fn failed_units(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Outcome of a `stop_all` pass
#[derive(Debug, Clone, Default)]
pub struct StopReport {
    /// Visit order, reverse of the last start order
    pub order: Vec<String>,
    pub stopped: Vec<String>,
    pub failures: Vec<(String, SupervisorError)>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_units(&self) -> Vec<&str> {
        self.failures.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Aggregate view over every registered unit
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall: HealthState,
    pub units: BTreeMap<String, StatusSnapshot>,
    pub total_units: usize,
    pub healthy_units: usize,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    fn from_snapshots(units: BTreeMap<String, StatusSnapshot>) -> Self {
        let healthy_units = units
            .values()
            .filter(|s| s.health == HealthState::Healthy)
            .count();
        let offline_units = units
            .values()
            .filter(|s| s.health == HealthState::Offline)
            .count();
        let total_units = units.len();

        let overall = if total_units == 0 || offline_units == total_units {
            HealthState::Offline
        } else if healthy_units == total_units {
            HealthState::Healthy
        } else if units
            .values()
            .any(|s| s.health.severity_level() >= HealthState::Unhealthy.severity_level())
        {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };

        Self {
            overall,
            units,
            total_units,
            healthy_units,
            checked_at: Utc::now(),
        }
    }
}

/// Registers managed units and drives their lifecycle.
///
/// Cheap to clone; clones share the same registry and monitor.
#[derive(Clone)]
pub struct LifecycleController {
    id: Uuid,
    config: Arc<LifecycleConfig>,
    registry: Arc<UnitRegistry>,
    locks: UnitLocks,
    last_start_order: Arc<Mutex<Vec<String>>>,
    monitor: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl LifecycleController {
    pub fn new(config: LifecycleConfig) -> Self {
        Self::with_unit_locks(config, UnitLocks::new())
    }

    /// Create a controller that serializes unit operations through `locks`
    pub fn with_unit_locks(config: LifecycleConfig, locks: UnitLocks) -> Self {
        let id = Uuid::new_v4();
        info!(
            controller_id = %id,
            health_check_interval_ms = config.health_check_interval_ms,
            failure_threshold = config.failure_threshold,
            "🏗️ LIFECYCLE: Controller created"
        );

        Self {
            id,
            config: Arc::new(config),
            registry: Arc::new(UnitRegistry::new()),
            locks,
            last_start_order: Arc::new(Mutex::new(Vec::new())),
            monitor: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(true)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Lock table to share with a recovery engine
    pub fn unit_locks(&self) -> UnitLocks {
        self.locks.clone()
    }

    /// Register a unit in `Stopped` state
    pub fn register(
        &self,
        name: &str,
        unit: Arc<dyn ManagedUnit>,
        dependencies: &[&str],
        startup_rank: i32,
    ) -> Result<()> {
        self.registry.insert(name, unit, dependencies, startup_rank)?;
        info!(
            unit = %name,
            dependencies = ?dependencies,
            startup_rank = startup_rank,
            "📝 LIFECYCLE: Registered unit"
        );
        Ok(())
    }

    /// Register a unit at [`DEFAULT_STARTUP_RANK`]
    pub fn register_default(
        &self,
        name: &str,
        unit: Arc<dyn ManagedUnit>,
        dependencies: &[&str],
    ) -> Result<()> {
        self.register(name, unit, dependencies, DEFAULT_STARTUP_RANK)
    }

    /// Register a unit built by `factory`; a construction error fails only
    /// this registration
    pub fn register_with<F>(
        &self,
        name: &str,
        factory: F,
        dependencies: &[&str],
        startup_rank: i32,
    ) -> Result<()>
    where
        F: FnOnce() -> anyhow::Result<Arc<dyn ManagedUnit>>,
    {
        if self.registry.contains(name) {
            return Err(SupervisorError::DuplicateName(name.to_string()));
        }
        let unit = factory().map_err(|e| {
            warn!(unit = %name, error = %e, "Unit construction failed");
            SupervisorError::Registration {
                name: name.to_string(),
                reason: format!("{e:#}"),
            }
        })?;
        self.register(name, unit, dependencies, startup_rank)
    }

    /// Remove a `Stopped` or `Error` unit
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.registry.remove(name)?;
        self.locks.remove(name);
        self.last_start_order.lock().retain(|n| n != name);
        info!(unit = %name, "🗑️ LIFECYCLE: Unregistered unit");
        Ok(())
    }

    /// Start every unit in rank order, then launch the health monitor
    /// unless the pass aborted
    #[instrument(skip(self), fields(controller_id = %self.id))]
    pub async fn start_all(&self, allow_partial_failure: bool) -> StartReport {
        let order = self.registry.start_order();
        *self.last_start_order.lock() = order.clone();

        info!(units = order.len(), "🚀 LIFECYCLE: Starting all units");

        let mut report = StartReport {
            order: order.clone(),
            allow_partial_failure,
            ..Default::default()
        };

        for (index, name) in order.iter().enumerate() {
            match self.start_unit(name).await {
                Ok(()) => report.started.push(name.clone()),
                Err(e) => {
                    error!(unit = %name, error = %e, "❌ LIFECYCLE: Unit failed to start");
                    report.failed.push((name.clone(), e));
                    if !allow_partial_failure {
                        report.aborted = true;
                        self.fail_blocked_units(&order[index + 1..], &mut report);
                        break;
                    }
                }
            }
        }

        if report.aborted {
            warn!(
                failed = ?report.failed_units(),
                "🛑 LIFECYCLE: Start aborted, health monitor not launched"
            );
        } else {
            self.start_health_monitor();
            info!(
                started = report.started.len(),
                failed = report.failed.len(),
                "✅ LIFECYCLE: Start pass complete"
            );
        }

        report
    }

    /// After an abort, units left behind whose dependencies are not running
    /// go to `Error` so they do not sit silently in `Stopped`
    fn fail_blocked_units(&self, remaining: &[String], report: &mut StartReport) {
        for name in remaining {
            match self.registry.state(name) {
                Ok(LifecycleState::Stopped | LifecycleState::Error) => {}
                _ => continue,
            }
            let Ok(Some(dependency)) = self.registry.unsatisfied_dependency(name) else {
                continue;
            };
            let err = SupervisorError::DependencyNotSatisfied {
                unit: name.clone(),
                dependency,
            };
            let reason = err.to_string();
            if self
                .registry
                .transition(name, LifecycleState::Error, Some(&reason))
                .is_ok()
            {
                report.failed.push((name.clone(), err));
            }
        }
    }

    /// Stop the health monitor, then every unit in reverse start order
    #[instrument(skip(self), fields(controller_id = %self.id))]
    pub async fn stop_all(&self) -> StopReport {
        info!("🛑 LIFECYCLE: Stopping all units");
        self.stop_health_monitor().await;

        let last = self.last_start_order.lock().clone();
        let mut order = if last.is_empty() {
            self.registry.start_order()
        } else {
            last
        };
        order.reverse();

        let mut report = StopReport {
            order: order.clone(),
            ..Default::default()
        };

        for name in &order {
            if !self.registry.contains(name) {
                continue;
            }
            let _guard = self.locks.acquire(name).await;
            match self.stop_locked(name).await {
                Ok(true) => report.stopped.push(name.clone()),
                Ok(false) => debug!(unit = %name, "Unit already stopped, skipping"),
                Err(e) => {
                    error!(unit = %name, error = %e, "Unit failed to stop, continuing");
                    report.failures.push((name.clone(), e));
                }
            }
        }

        info!(
            stopped = report.stopped.len(),
            failures = report.failures.len(),
            "✅ LIFECYCLE: Stop pass complete"
        );
        report
    }

    /// Stop (unless already stopped), settle, and start again with the
    /// usual dependency check
    #[instrument(skip(self), fields(controller_id = %self.id))]
    pub async fn restart(&self, name: &str) -> Result<()> {
        let _guard = self.locks.acquire(name).await;
        self.restart_locked(name).await
    }

    async fn restart_locked(&self, name: &str) -> Result<()> {
        let restart_count = self.registry.increment_restart_count(name)?;
        info!(unit = %name, restart_count = restart_count, "🔄 LIFECYCLE: Restarting unit");

        if let Err(e) = self.stop_locked(name).await {
            warn!(unit = %name, error = %e, "Stop during restart failed, starting anyway");
        }
        tokio::time::sleep(self.config.restart_settle()).await;
        self.start_locked(name).await
    }

    /// Start one unit under its lock
    async fn start_unit(&self, name: &str) -> Result<()> {
        let _guard = self.locks.acquire(name).await;
        self.start_locked(name).await
    }

    async fn start_locked(&self, name: &str) -> Result<()> {
        let handle = self.registry.handle(name)?;
        if self.registry.state(name)? == LifecycleState::Running {
            debug!(unit = %name, "Unit already running");
            return Ok(());
        }

        if let Some(dependency) = self.registry.unsatisfied_dependency(name)? {
            let err = SupervisorError::DependencyNotSatisfied {
                unit: name.to_string(),
                dependency,
            };
            self.registry
                .transition(name, LifecycleState::Error, Some(&err.to_string()))?;
            return Err(err);
        }

        self.registry.transition(name, LifecycleState::Starting, None)?;
        match bounded_call(
            name,
            UnitOperation::Start,
            self.config.start_timeout(),
            handle.start(),
        )
        .await
        {
            Ok(()) => {
                self.registry.transition(name, LifecycleState::Running, None)?;
                Ok(())
            }
            Err(e) => {
                self.registry
                    .transition(name, LifecycleState::Error, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Stop one unit; `Ok(false)` when it was already stopped.
    /// Caller holds the unit lock.
    async fn stop_locked(&self, name: &str) -> Result<bool> {
        let handle = self.registry.handle(name)?;
        if self.registry.state(name)? == LifecycleState::Stopped {
            return Ok(false);
        }

        self.registry.transition(name, LifecycleState::Stopping, None)?;
        match bounded_call(
            name,
            UnitOperation::Stop,
            self.config.stop_timeout(),
            handle.stop(),
        )
        .await
        {
            Ok(()) => {
                self.registry.transition(name, LifecycleState::Stopped, None)?;
                Ok(true)
            }
            Err(e) => {
                self.registry
                    .transition(name, LifecycleState::Error, Some(&e.to_string()))?;
                Err(e)
            }
        }
    }

    /// Status of one unit; synthesized from lifecycle state when the unit
    /// does not report its own
    pub async fn get_status(&self, name: &str) -> Result<StatusSnapshot> {
        let handle = self.registry.handle(name)?;
        let state = self.registry.state(name)?;

        if !handle.capabilities().status {
            return Ok(StatusSnapshot::from_lifecycle(name, state));
        }

        let mut snapshot = match bounded_call(
            name,
            UnitOperation::Status,
            self.config.status_timeout(),
            handle.get_status(),
        )
        .await
        {
            Ok(mut snapshot) => {
                snapshot.unit_name = name.to_string();
                snapshot
            }
            Err(e) => {
                debug!(unit = %name, error = %e, "Status call failed, reporting offline");
                StatusSnapshot::offline(name).with_error(e.to_string())
            }
        };

        snapshot
            .details
            .entry("state".to_string())
            .or_insert_with(|| state.to_string().into());
        Ok(snapshot)
    }

    /// Status of every registered unit, queried concurrently
    pub async fn get_all_status(&self) -> BTreeMap<String, StatusSnapshot> {
        let names = self.registry.names();
        let results = join_all(names.iter().map(|name| self.get_status(name))).await;

        names
            .into_iter()
            .zip(results)
            .filter_map(|(name, result)| result.ok().map(|snapshot| (name, snapshot)))
            .collect()
    }

    pub async fn system_health(&self) -> SystemHealth {
        SystemHealth::from_snapshots(self.get_all_status().await)
    }

    pub fn unit_state(&self, name: &str) -> Result<LifecycleState> {
        self.registry.state(name)
    }

    pub fn unit_record(&self, name: &str) -> Result<UnitInfo> {
        self.registry.info(name)
    }

    pub fn get_unit(&self, name: &str) -> Result<Arc<dyn ManagedUnit>> {
        self.registry.handle(name)
    }

    pub fn unit_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests;
