//! # Recovery Rules
//!
//! Condition → action mappings with attempt limiting. Rules are kept in a
//! [`RuleSet`] ordered by priority (highest first, ties in insertion order).

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::actions::{ActionParameters, RecoveryAction};
use crate::config::{DefaultRulesConfig, RulePolicyConfig};
use crate::error::{Result, SupervisorError};
use crate::unit::{HealthState, StatusSnapshot};

/// Predicate evaluated against a unit's status snapshot
pub type RuleCondition = Arc<dyn Fn(&StatusSnapshot) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RecoveryRule {
    pub name: String,
    pub condition: RuleCondition,
    pub action: RecoveryAction,
    pub parameters: ActionParameters,
    /// Attempts allowed within one cooldown window
    pub max_attempts: u32,
    /// Trailing window over which attempts are counted
    pub cooldown: Duration,
    pub priority: i32,
}

impl RecoveryRule {
    /// A rule that never matches until [`when`](Self::when) sets a condition
    pub fn new(name: impl Into<String>, action: RecoveryAction) -> Self {
        Self {
            name: name.into(),
            condition: Arc::new(|_| false),
            action,
            parameters: ActionParameters::new(),
            max_attempts: 3,
            cooldown: Duration::from_secs(60),
            priority: 1,
        }
    }

    pub fn when<F>(mut self, condition: F) -> Self
    where
        F: Fn(&StatusSnapshot) -> bool + Send + Sync + 'static,
    {
        self.condition = Arc::new(condition);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    fn with_policy(self, policy: RulePolicyConfig) -> Self {
        self.max_attempts(policy.max_attempts)
            .cooldown(policy.cooldown())
            .priority(policy.priority)
    }

    pub fn matches(&self, snapshot: &StatusSnapshot) -> bool {
        (self.condition)(snapshot)
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            name: self.name.clone(),
            action: self.action,
            max_attempts: self.max_attempts,
            cooldown_ms: self.cooldown.as_millis() as u64,
            priority: self.priority,
        }
    }
}

impl fmt::Debug for RecoveryRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryRule")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("parameters", &self.parameters)
            .field("max_attempts", &self.max_attempts)
            .field("cooldown", &self.cooldown)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Serializable description of a rule (the condition is opaque)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub action: RecoveryAction,
    pub max_attempts: u32,
    pub cooldown_ms: u64,
    pub priority: i32,
}

/// Rules ordered by descending priority, ties in insertion order
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<RecoveryRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rule: RecoveryRule) -> Result<()> {
        if self.rules.iter().any(|existing| existing.name == rule.name) {
            return Err(SupervisorError::DuplicateRule(rule.name));
        }
        let position = self
            .rules
            .partition_point(|existing| existing.priority >= rule.priority);
        self.rules.insert(position, rule);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecoveryRule> {
        self.rules.iter()
    }

    /// Highest-priority rule whose condition holds for the snapshot
    pub fn first_match(&self, snapshot: &StatusSnapshot) -> Option<&RecoveryRule> {
        self.rules.iter().find(|rule| rule.matches(snapshot))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Built-in rules covering the common failure signatures
pub fn default_rules(config: &DefaultRulesConfig) -> Vec<RecoveryRule> {
    let error_rate_threshold = config.error_rate_threshold;
    let memory_threshold = config.memory_threshold_bytes as f64;

    vec![
        RecoveryRule::new("service_offline_restart", RecoveryAction::RestartService)
            .when(|status| status.health == HealthState::Offline)
            .parameter("service_name", "auto")
            .with_policy(config.offline_restart),
        RecoveryRule::new("high_error_rate_reset", RecoveryAction::ResetConnection)
            .when(move |status| {
                status
                    .detail_f64("error_rate")
                    .is_some_and(|rate| rate > error_rate_threshold)
            })
            .with_policy(config.error_rate_reset),
        RecoveryRule::new("memory_leak_restart", RecoveryAction::RestartService)
            .when(move |status| {
                status
                    .detail_f64("memory_usage")
                    .is_some_and(|bytes| bytes > memory_threshold)
            })
            .parameter("service_name", "auto")
            .with_policy(config.memory_restart),
        RecoveryRule::new("connection_timeout_reset", RecoveryAction::ResetConnection)
            .when(|status| status.error_contains("timeout"))
            .with_policy(config.timeout_reset),
        RecoveryRule::new("config_error_reload", RecoveryAction::ReloadConfig)
            .when(|status| status.error_contains("config"))
            .with_policy(config.config_reload),
    ]
}
