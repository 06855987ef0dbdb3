//! # Recovery Rule Engine
//!
//! Self-healing loop that polls the status of its own set of registered
//! units, matches prioritized [`RecoveryRule`]s and runs compensating
//! actions through the [`ActionExecutor`].
//!
//! ## Key Components
//!
//! - [`RecoveryEngine`] - polling loop, rule evaluation, manual recovery
//! - [`rules`] - rule definitions, ordering and the built-in rule set
//! - [`history`] - attempt ledger used for cooldown bookkeeping and audit
//! - [`executor`] - action to hook mapping
//!
//! ## Evaluation
//!
//! Per unit and per cycle only the highest-priority matching rule is
//! considered. If its attempts within the cooldown window already reached
//! `max_attempts` it is skipped, and no lower-priority rule is tried for that
//! unit in the same cycle. Otherwise its action runs exactly once and the
//! outcome is recorded. A condition that persists is retried on later cycles.
//!
//! The engine shares nothing with the lifecycle controller except the
//! [`ManagedUnit`] surface and, if the host passes one, a [`UnitLocks`] table.

pub mod actions;
pub mod executor;
pub mod history;
pub mod rules;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::RecoveryConfig;
use crate::error::{Result, SupervisorError, UnitOperation};
use crate::logging::log_recovery_attempt;
use crate::unit::{
    bounded_call, HealthState, ManagedUnit, StatusSnapshot, UnitCapabilities, UnitLocks,
};

pub use actions::{ActionParameters, RecoveryAction};
pub use executor::{ActionExecutor, ActionOutcome};
pub use history::{AttemptKey, AttemptLedger, AttemptStats, RecoveryAttempt, MANUAL_RULE_NAME};
pub use rules::{default_rules, RecoveryRule, RuleSet, RuleSummary};

/// What one poll cycle did for one unit
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// No rule matched the snapshot
    NoMatch,
    /// The matching rule is out of attempts for its cooldown window
    Suppressed { rule: String, recent_attempts: usize },
    /// The matching rule's action ran
    Executed(RecoveryAttempt),
}

impl PollOutcome {
    pub fn executed(&self) -> Option<&RecoveryAttempt> {
        match self {
            Self::Executed(attempt) => Some(attempt),
            _ => None,
        }
    }
}

/// Engine-level counters reported through `get_status` and `recovery_stats`
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub monitoring_active: bool,
    pub registered_services: usize,
    pub recovery_rules: usize,
    pub total_recovery_attempts: usize,
    pub successful_recoveries: usize,
    pub success_rate: f64,
}

/// State shared between the engine handle and its polling task
struct EngineCore {
    id: Uuid,
    config: RecoveryConfig,
    services: RwLock<BTreeMap<String, Arc<dyn ManagedUnit>>>,
    rules: RwLock<RuleSet>,
    ledger: AttemptLedger,
    executor: ActionExecutor,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

pub struct RecoveryEngine {
    core: Arc<EngineCore>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl RecoveryEngine {
    /// Create an engine with its own unit locks
    pub fn new(config: RecoveryConfig) -> Self {
        Self::with_unit_locks(config, UnitLocks::new())
    }

    /// Create an engine whose restarts take turns with another subsystem
    /// holding the same `locks`
    pub fn with_unit_locks(config: RecoveryConfig, locks: UnitLocks) -> Self {
        let mut rules = RuleSet::new();
        if config.install_default_rules {
            for rule in default_rules(&config.default_rules) {
                if let Err(e) = rules.insert(rule) {
                    warn!("Skipping built-in recovery rule: {}", e);
                }
            }
        }

        let core = EngineCore {
            id: Uuid::new_v4(),
            ledger: AttemptLedger::new(config.history_retention()),
            executor: ActionExecutor::new(&config, locks),
            services: RwLock::new(BTreeMap::new()),
            rules: RwLock::new(rules),
            shutdown: AtomicBool::new(true),
            shutdown_notify: Notify::new(),
            config,
        };

        info!(
            engine_id = %core.id,
            rules = core.rules.read().len(),
            poll_interval_ms = core.config.poll_interval_ms,
            "🩺 RECOVERY: Engine created"
        );

        Self {
            core: Arc::new(core),
            monitor: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// Add a unit to the polling set, replacing any unit of the same name
    pub fn register_service(&self, name: impl Into<String>, unit: Arc<dyn ManagedUnit>) {
        let name = name.into();
        if self.core.services.write().insert(name.clone(), unit).is_some() {
            warn!(unit = %name, "Replaced unit already registered for recovery");
        } else {
            info!(unit = %name, "Registered unit for recovery");
        }
    }

    /// Drop a unit from the polling set along with its attempt history
    pub fn unregister_service(&self, name: &str) -> Result<()> {
        self.core
            .services
            .write()
            .remove(name)
            .ok_or_else(|| SupervisorError::UnitNotFound(name.to_string()))?;
        self.core.ledger.forget_unit(name);
        info!(unit = %name, "Unregistered unit from recovery");
        Ok(())
    }

    pub fn registered_services(&self) -> Vec<String> {
        self.core.services.read().keys().cloned().collect()
    }

    /// Insert a rule, keeping descending priority order. History retention
    /// is extended to the rule's cooldown if needed.
    pub fn add_rule(&self, rule: RecoveryRule) -> Result<()> {
        let name = rule.name.clone();
        let cooldown = rule.cooldown;
        self.core.rules.write().insert(rule)?;
        self.core.ledger.retain_at_least(cooldown);
        info!(rule = %name, "Added recovery rule");
        Ok(())
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> Vec<RuleSummary> {
        self.core.rules.read().iter().map(RecoveryRule::summary).collect()
    }

    /// Run one polling cycle over every registered unit
    pub async fn poll_once(&self) -> BTreeMap<String, PollOutcome> {
        self.core.poll_cycle(false).await
    }

    /// Execute an action now, bypassing rule matching and cooldowns.
    ///
    /// Recorded under the `manual` rule key. Returns `false` (never an
    /// error) when the unit is unknown or cannot perform the action.
    #[instrument(skip(self, parameters), fields(engine_id = %self.core.id))]
    pub async fn manual_recovery(
        &self,
        name: &str,
        action: RecoveryAction,
        parameters: ActionParameters,
    ) -> bool {
        let unit = self.core.services.read().get(name).cloned();
        let outcome = self
            .core
            .executor
            .execute(name, unit.as_ref(), action, &parameters)
            .await;

        log_recovery_attempt(
            name,
            MANUAL_RULE_NAME,
            action,
            outcome.success,
            outcome.error.as_deref(),
        );
        self.core.ledger.record(
            AttemptKey::manual(name),
            RecoveryAttempt::new(MANUAL_RULE_NAME, action, outcome.success, outcome.error),
        );

        outcome.success
    }

    /// Recorded attempts keyed by (unit, rule), optionally for one unit
    pub fn get_recovery_history(
        &self,
        name: Option<&str>,
    ) -> BTreeMap<AttemptKey, Vec<RecoveryAttempt>> {
        self.core.ledger.history(name)
    }

    pub fn recovery_stats(&self) -> RecoveryStats {
        let attempts = self.core.ledger.stats();
        RecoveryStats {
            monitoring_active: self.is_monitoring(),
            registered_services: self.core.services.read().len(),
            recovery_rules: self.core.rules.read().len(),
            total_recovery_attempts: attempts.total_attempts,
            successful_recoveries: attempts.successful_attempts,
            success_rate: attempts.success_rate(),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Launch the background polling loop
    #[instrument(skip(self), fields(engine_id = %self.core.id))]
    pub fn start_monitoring(&self) -> Result<()> {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(SupervisorError::InvalidState {
                unit: "recovery_engine".to_string(),
                message: "monitoring loop is already running".to_string(),
            });
        }

        self.core.shutdown.store(false, Ordering::Release);
        *monitor = Some(tokio::spawn(EngineCore::run(self.core.clone())));

        info!("🚀 RECOVERY: Monitoring loop started");
        Ok(())
    }

    /// Signal the polling loop to stop and wait for it to finish its
    /// current iteration
    #[instrument(skip(self), fields(engine_id = %self.core.id))]
    pub async fn stop_monitoring(&self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.shutdown_notify.notify_waiters();

        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            let grace = self.core.config.status_timeout() + self.core.config.action_timeout();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Recovery monitoring task ended abnormally: {}", e),
                Err(_) => warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Recovery monitoring loop still busy after shutdown signal, detaching"
                ),
            }
        }

        info!("🛑 RECOVERY: Monitoring loop stopped");
    }
}

impl EngineCore {
    async fn run(core: Arc<EngineCore>) {
        loop {
            // Registered before the flag check so a notify sent mid-cycle is not lost
            let notified = core.shutdown_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if core.shutdown.load(Ordering::Acquire) {
                break;
            }

            // A panic inside the cycle task surfaces as a JoinError and backs
            // off the loop; with `panic = "abort"` it ends the process instead.
            let cycle = core.clone();
            let delay = match tokio::spawn(async move { cycle.poll_cycle(true).await }).await {
                Ok(_) => core.config.poll_interval(),
                Err(e) => {
                    error!("Recovery poll cycle failed: {}", e);
                    core.config.loop_error_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut notified => break,
            }
        }

        debug!(engine_id = %core.id, "Recovery monitoring loop exited");
    }

    /// One pass over the polling set. A `cooperative` pass belongs to the
    /// background loop and ends early once shutdown is requested.
    async fn poll_cycle(&self, cooperative: bool) -> BTreeMap<String, PollOutcome> {
        let units: Vec<(String, Arc<dyn ManagedUnit>)> = self
            .services
            .read()
            .iter()
            .map(|(name, unit)| (name.clone(), unit.clone()))
            .collect();

        let mut outcomes = BTreeMap::new();
        for (name, unit) in units {
            if cooperative && self.shutdown.load(Ordering::Acquire) {
                debug!("Shutdown requested, ending poll cycle early");
                break;
            }
            let snapshot = self.acquire_status(&name, &unit).await;
            let outcome = self.evaluate(&name, &unit, &snapshot).await;
            outcomes.insert(name, outcome);
        }

        let pruned = self.ledger.prune_expired();
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned expired recovery attempts");
        }
        outcomes
    }

    /// Status snapshot for one unit; a failed or hung status call becomes an
    /// `Error` snapshot so the failure itself can trigger recovery
    async fn acquire_status(&self, name: &str, unit: &Arc<dyn ManagedUnit>) -> StatusSnapshot {
        if !unit.capabilities().status {
            return StatusSnapshot::new(name, HealthState::Unknown);
        }

        match bounded_call(
            name,
            UnitOperation::Status,
            self.config.status_timeout(),
            unit.get_status(),
        )
        .await
        {
            Ok(mut snapshot) => {
                snapshot.unit_name = name.to_string();
                snapshot
            }
            Err(e) => {
                warn!(unit = %name, error = %e, "Status acquisition failed");
                StatusSnapshot::acquisition_failed(name, e.to_string())
            }
        }
    }

    async fn evaluate(
        &self,
        name: &str,
        unit: &Arc<dyn ManagedUnit>,
        snapshot: &StatusSnapshot,
    ) -> PollOutcome {
        let Some(rule) = self.rules.read().first_match(snapshot).cloned() else {
            return PollOutcome::NoMatch;
        };

        let key = AttemptKey::new(name, &rule.name);
        let recent_attempts = self.ledger.count_within(&key, rule.cooldown);
        if recent_attempts >= rule.max_attempts as usize {
            debug!(
                unit = %name,
                rule = %rule.name,
                recent_attempts = recent_attempts,
                max_attempts = rule.max_attempts,
                "Recovery rule in cooldown, skipping unit this cycle"
            );
            return PollOutcome::Suppressed {
                rule: rule.name,
                recent_attempts,
            };
        }

        let outcome = self
            .executor
            .execute(name, Some(unit), rule.action, &rule.parameters)
            .await;

        log_recovery_attempt(
            name,
            &rule.name,
            rule.action,
            outcome.success,
            outcome.error.as_deref(),
        );
        let attempt = RecoveryAttempt::new(&rule.name, rule.action, outcome.success, outcome.error);
        self.ledger.record(key, attempt.clone());

        PollOutcome::Executed(attempt)
    }
}

/// The engine is itself a managed unit so the host can register it with the
/// lifecycle controller alongside everything else.
#[async_trait]
impl ManagedUnit for RecoveryEngine {
    async fn start(&self) -> anyhow::Result<()> {
        self.start_monitoring()?;
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stop_monitoring().await;
        Ok(())
    }

    fn capabilities(&self) -> UnitCapabilities {
        UnitCapabilities::none().with_status()
    }

    async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        let stats = self.recovery_stats();
        let health = if stats.monitoring_active {
            HealthState::Healthy
        } else {
            HealthState::Offline
        };

        Ok(StatusSnapshot::new("recovery_engine", health)
            .with_detail("monitoring_active", stats.monitoring_active)
            .with_detail("registered_services", stats.registered_services)
            .with_detail("recovery_rules", stats.recovery_rules)
            .with_detail("total_recovery_attempts", stats.total_recovery_attempts)
            .with_detail("successful_recoveries", stats.successful_recoveries)
            .with_detail("success_rate", stats.success_rate))
    }
}

impl Drop for RecoveryEngine {
    fn drop(&mut self) {
        self.core.shutdown.store(true, Ordering::Release);
        self.core.shutdown_notify.notify_waiters();
    }
}
