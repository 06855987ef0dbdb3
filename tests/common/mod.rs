#![allow(dead_code)]

pub mod mock_unit;
pub mod strategies;

pub use mock_unit::*;

use supervisor_core::config::{LifecycleConfig, RecoveryConfig};

/// Lifecycle settings with millisecond-scale intervals
pub fn fast_lifecycle_config() -> LifecycleConfig {
    LifecycleConfig {
        health_check_interval_ms: 25,
        health_check_timeout_ms: 100,
        failure_threshold: 3,
        restart_settle_ms: 1,
        start_timeout_ms: 500,
        stop_timeout_ms: 500,
        status_timeout_ms: 100,
        loop_error_backoff_ms: 25,
    }
}

/// Recovery settings with millisecond-scale pauses and no built-in rules
pub fn fast_recovery_config() -> RecoveryConfig {
    RecoveryConfig {
        poll_interval_ms: 25,
        status_timeout_ms: 100,
        action_timeout_ms: 500,
        restart_pause_ms: 1,
        reset_pause_ms: 1,
        install_default_rules: false,
        ..Default::default()
    }
}

/// Poll `check` until it holds or `attempts` 10ms sleeps have passed
pub async fn eventually<F>(attempts: usize, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..attempts {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
