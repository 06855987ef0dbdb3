//! # Recovery Attempt History
//!
//! Append-only attempt records keyed by (unit, rule). Cooldown windows are
//! measured on the monotonic tokio clock; wall-clock timestamps are kept
//! for audit output only. Records older than the retention window are
//! pruned so memory stays bounded. Retention never drops below the longest
//! cooldown it has been asked to cover.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::actions::RecoveryAction;

/// Rule key used for attempts made through manual recovery
pub const MANUAL_RULE_NAME: &str = "manual";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AttemptKey {
    pub unit: String,
    pub rule: String,
}

impl AttemptKey {
    pub fn new(unit: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            rule: rule.into(),
        }
    }

    pub fn manual(unit: impl Into<String>) -> Self {
        Self::new(unit, MANUAL_RULE_NAME)
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.unit, self.rule)
    }
}

/// One executed recovery action and its outcome
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAttempt {
    pub rule_name: String,
    pub action: RecoveryAction,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    #[serde(skip)]
    recorded_at: Instant,
}

impl RecoveryAttempt {
    pub fn new(
        rule_name: impl Into<String>,
        action: RecoveryAction,
        success: bool,
        error: Option<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            action,
            timestamp: Utc::now(),
            success,
            error,
            recorded_at: Instant::now(),
        }
    }

    /// Time since the attempt was recorded, on the monotonic clock
    pub fn age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.recorded_at)
    }
}

/// Totals across the whole ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AttemptStats {
    pub total_attempts: usize,
    pub successful_attempts: usize,
}

impl AttemptStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }
}

#[derive(Debug)]
pub struct AttemptLedger {
    attempts: Mutex<HashMap<AttemptKey, Vec<RecoveryAttempt>>>,
    retention: RwLock<Duration>,
}

impl AttemptLedger {
    pub fn new(retention: Duration) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            retention: RwLock::new(retention),
        }
    }

    pub fn retention(&self) -> Duration {
        *self.retention.read()
    }

    /// Extend retention so attempts stay countable for a `window`-long cooldown
    pub fn retain_at_least(&self, window: Duration) {
        let mut retention = self.retention.write();
        if window > *retention {
            debug!(
                previous_ms = retention.as_millis() as u64,
                retention_ms = window.as_millis() as u64,
                "Extending recovery history retention to cover rule cooldown"
            );
            *retention = window;
        }
    }

    /// Attempts for the key made within the trailing window
    pub fn count_within(&self, key: &AttemptKey, window: Duration) -> usize {
        self.attempts
            .lock()
            .get(key)
            .map(|attempts| attempts.iter().filter(|a| a.age() < window).count())
            .unwrap_or(0)
    }

    /// Append an attempt and drop this key's records past retention
    pub fn record(&self, key: AttemptKey, attempt: RecoveryAttempt) {
        let retention = self.retention();
        let mut attempts = self.attempts.lock();
        let entry = attempts.entry(key).or_default();
        entry.push(attempt);
        entry.retain(|a| a.age() < retention);
    }

    /// Drop every record past retention; returns how many were removed
    pub fn prune_expired(&self) -> usize {
        let retention = self.retention();
        let mut attempts = self.attempts.lock();
        let mut removed = 0;
        attempts.retain(|_, records| {
            let before = records.len();
            records.retain(|a| a.age() < retention);
            removed += before - records.len();
            !records.is_empty()
        });
        removed
    }

    /// Recorded attempts, optionally limited to one unit
    pub fn history(&self, unit: Option<&str>) -> BTreeMap<AttemptKey, Vec<RecoveryAttempt>> {
        self.attempts
            .lock()
            .iter()
            .filter(|(key, _)| unit.map_or(true, |name| key.unit == name))
            .map(|(key, records)| (key.clone(), records.clone()))
            .collect()
    }

    pub fn stats(&self) -> AttemptStats {
        let attempts = self.attempts.lock();
        let mut stats = AttemptStats::default();
        for attempt in attempts.values().flatten() {
            stats.total_attempts += 1;
            if attempt.success {
                stats.successful_attempts += 1;
            }
        }
        stats
    }

    pub fn forget_unit(&self, unit: &str) {
        self.attempts.lock().retain(|key, _| key.unit != unit);
    }
}
