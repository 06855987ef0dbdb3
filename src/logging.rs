//! # Structured Logging Module
//!
//! Environment-aware `tracing` setup and the structured events the
//! supervisor emits for state transitions, health-check failures and
//! recovery attempts. Hosts that install their own subscriber can skip
//! [`init_structured_logging`]; the event helpers work with any subscriber.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::recovery::RecoveryAction;
use crate::state_machine::LifecycleState;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Target for audit entries (recovery attempts and admin notifications)
pub const AUDIT_TARGET: &str = "supervisor::audit";

/// Initialize console logging with environment-specific configuration
///
/// `RUST_LOG` wins over the environment default. `SUPERVISOR_LOG_FORMAT=json`
/// switches to JSON lines for log shippers.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("SUPERVISOR_LOG_FORMAT").is_ok_and(|f| f == "json");

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host or test harness may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("SUPERVISOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log a lifecycle state transition of a managed unit
pub fn log_state_transition(
    unit: &str,
    from: LifecycleState,
    to: LifecycleState,
    reason: Option<&str>,
) {
    if to == LifecycleState::Error {
        tracing::warn!(
            unit = %unit,
            from = %from,
            to = %to,
            reason = reason,
            timestamp = %Utc::now().to_rfc3339(),
            "🔄 STATE_TRANSITION"
        );
    } else {
        tracing::info!(
            unit = %unit,
            from = %from,
            to = %to,
            reason = reason,
            timestamp = %Utc::now().to_rfc3339(),
            "🔄 STATE_TRANSITION"
        );
    }
}

/// Log a failed (or timed out) health check
pub fn log_health_check_failure(
    unit: &str,
    consecutive_failures: u32,
    threshold: u32,
    details: Option<&str>,
) {
    tracing::warn!(
        unit = %unit,
        consecutive_failures = consecutive_failures,
        threshold = threshold,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🏥 HEALTH_CHECK_FAILED"
    );
}

/// Audit entry for every recovery attempt, automatic or manual
pub fn log_recovery_attempt(
    unit: &str,
    rule_name: &str,
    action: RecoveryAction,
    success: bool,
    error: Option<&str>,
) {
    if success {
        tracing::info!(
            target: AUDIT_TARGET,
            unit = %unit,
            rule = %rule_name,
            action = %action,
            success = success,
            timestamp = %Utc::now().to_rfc3339(),
            "🩹 RECOVERY_ATTEMPT"
        );
    } else {
        tracing::warn!(
            target: AUDIT_TARGET,
            unit = %unit,
            rule = %rule_name,
            action = %action,
            success = success,
            error = error,
            timestamp = %Utc::now().to_rfc3339(),
            "🩹 RECOVERY_ATTEMPT"
        );
    }
}

/// High-severity entry asking an operator to look at a unit
pub fn log_admin_notification(unit: &str, message: &str) {
    tracing::error!(
        target: AUDIT_TARGET,
        unit = %unit,
        message = %message,
        timestamp = %Utc::now().to_rfc3339(),
        "🚨 ADMIN_ATTENTION_REQUIRED"
    );
}
