mod common;

use common::*;
use std::time::Duration;

use supervisor_core::config::RecoveryConfig;
use supervisor_core::recovery::{
    ActionParameters, AttemptKey, PollOutcome, RecoveryAction, RecoveryEngine, RecoveryRule,
};
use supervisor_core::unit::{HealthState, UnitCapabilities};

fn offline_restart_rule(max_attempts: u32, cooldown: Duration) -> RecoveryRule {
    RecoveryRule::new("offline_restart", RecoveryAction::RestartService)
        .when(|s| s.health == HealthState::Offline)
        .max_attempts(max_attempts)
        .cooldown(cooldown)
}

#[tokio::test(start_paused = true)]
async fn test_attempts_are_limited_within_cooldown() {
    let log = event_log();
    let engine = RecoveryEngine::new(fast_recovery_config());
    engine
        .add_rule(offline_restart_rule(2, Duration::from_secs(60)))
        .unwrap();
    let unit = MockUnit::new("speech", &log)
        .with_capabilities(UnitCapabilities::none().with_status())
        .with_health(HealthState::Offline)
        .arc();
    engine.register_service("speech", unit.clone());

    let mut outcomes = Vec::new();
    for _ in 0..4 {
        outcomes.push(engine.poll_once().await.remove("speech").unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    assert!(outcomes[0].executed().is_some());
    assert!(outcomes[1].executed().is_some());
    for skipped in &outcomes[2..] {
        assert!(matches!(
            skipped,
            PollOutcome::Suppressed { rule, recent_attempts: 2 } if rule == "offline_restart"
        ));
    }
    assert_eq!(unit.count(&unit.starts), 2);

    // window slides past the first two attempts
    tokio::time::advance(Duration::from_secs(60)).await;
    assert!(engine.poll_once().await["speech"].executed().is_some());
    assert_eq!(unit.count(&unit.starts), 3);
}

#[tokio::test]
async fn test_only_highest_priority_match_runs() {
    let log = event_log();
    let engine = RecoveryEngine::new(fast_recovery_config());
    engine
        .add_rule(
            RecoveryRule::new("degraded_clear_cache", RecoveryAction::ClearCache)
                .when(|s| s.health == HealthState::Degraded)
                .priority(1),
        )
        .unwrap();
    engine
        .add_rule(
            RecoveryRule::new("degraded_reload", RecoveryAction::ReloadConfig)
                .when(|s| s.health == HealthState::Degraded)
                .priority(5),
        )
        .unwrap();

    let rule_names: Vec<String> = engine.rules().into_iter().map(|r| r.name).collect();
    assert_eq!(rule_names, vec!["degraded_reload", "degraded_clear_cache"]);

    let unit = MockUnit::new("llm", &log)
        .with_capabilities(UnitCapabilities::all())
        .with_health(HealthState::Degraded)
        .arc();
    engine.register_service("llm", unit.clone());

    let outcomes = engine.poll_once().await;
    let attempt = outcomes["llm"].executed().unwrap();
    assert_eq!(attempt.rule_name, "degraded_reload");
    assert_eq!(unit.count(&unit.reloads), 1);
    assert_eq!(unit.count(&unit.cache_clears), 0);
}

#[tokio::test]
async fn test_suppressed_rule_does_not_fall_through() {
    let log = event_log();
    let engine = RecoveryEngine::new(fast_recovery_config());
    engine
        .add_rule(offline_restart_rule(1, Duration::from_secs(60)).priority(10))
        .unwrap();
    engine
        .add_rule(
            RecoveryRule::new("offline_clear_cache", RecoveryAction::ClearCache)
                .when(|s| s.health == HealthState::Offline)
                .priority(1),
        )
        .unwrap();
    let unit = MockUnit::new("cache", &log)
        .with_capabilities(UnitCapabilities::all())
        .with_health(HealthState::Offline)
        .arc();
    engine.register_service("cache", unit.clone());

    engine.poll_once().await;
    let second = engine.poll_once().await;

    assert!(matches!(second["cache"], PollOutcome::Suppressed { .. }));
    assert_eq!(unit.count(&unit.cache_clears), 0);
    assert_eq!(unit.count(&unit.starts), 1);
}

#[tokio::test]
async fn test_manual_recovery_reports_failure_without_raising() {
    let log = event_log();
    let engine = RecoveryEngine::new(fast_recovery_config());
    let unit = MockUnit::new("automation", &log).arc();
    engine.register_service("automation", unit.clone());

    assert!(
        !engine
            .manual_recovery("automation", RecoveryAction::ClearCache, ActionParameters::new())
            .await
    );
    assert!(
        !engine
            .manual_recovery("ghost", RecoveryAction::RestartService, ActionParameters::new())
            .await
    );
    assert!(
        engine
            .manual_recovery("automation", RecoveryAction::RestartService, ActionParameters::new())
            .await
    );

    let history = engine.get_recovery_history(Some("automation"));
    let manual = &history[&AttemptKey::manual("automation")];
    assert_eq!(manual.len(), 2);
    assert!(!manual[0].success);
    assert!(manual[0].error.as_deref().unwrap().contains("does not support"));
    assert!(manual[1].success);

    let stats = engine.recovery_stats();
    assert_eq!(stats.total_recovery_attempts, 3);
    assert_eq!(stats.successful_recoveries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_default_offline_rule_fires_then_cools_down() {
    let log = event_log();
    let engine = RecoveryEngine::new(RecoveryConfig::default());
    let unit = MockUnit::new("speech", &log)
        .with_capabilities(UnitCapabilities::none().with_status())
        .with_health(HealthState::Offline)
        .arc();
    engine.register_service("speech", unit.clone());

    for poll in 1..=3 {
        let outcome = engine.poll_once().await.remove("speech").unwrap();
        let attempt = outcome.executed().unwrap_or_else(|| panic!("poll {poll} did not act"));
        assert_eq!(attempt.rule_name, "service_offline_restart");
        assert_eq!(attempt.action, RecoveryAction::RestartService);
    }

    let fourth = engine.poll_once().await;
    assert!(matches!(fourth["speech"], PollOutcome::Suppressed { .. }));
    assert_eq!(unit.count(&unit.starts), 3);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(engine.poll_once().await["speech"].executed().is_some());
}

#[tokio::test]
async fn test_failed_status_call_becomes_recoverable_error() {
    let log = event_log();
    let engine = RecoveryEngine::new(RecoveryConfig {
        reset_pause_ms: 1,
        restart_pause_ms: 1,
        ..Default::default()
    });
    let unit = MockUnit::new("llm", &log)
        .with_capabilities(UnitCapabilities::none().with_status().with_reset_connection())
        .arc();
    unit.set_status_error(Some("upstream Timeout while reading"));
    engine.register_service("llm", unit.clone());

    let outcomes = engine.poll_once().await;
    let attempt = outcomes["llm"].executed().unwrap();
    assert_eq!(attempt.rule_name, "connection_timeout_reset");
    assert_eq!(unit.count(&unit.resets), 1);

    unit.set_status_error(Some("invalid config key 'model'"));
    let second = engine.poll_once().await;
    let attempt = second["llm"].executed().unwrap();
    assert_eq!(attempt.rule_name, "config_error_reload");
    assert!(!attempt.success);

    unit.set_status_error(None);
    assert!(matches!(
        engine.poll_once().await["llm"],
        PollOutcome::NoMatch
    ));
}

#[tokio::test]
async fn test_history_filter_by_unit() {
    let log = event_log();
    let engine = RecoveryEngine::new(fast_recovery_config());
    engine
        .add_rule(offline_restart_rule(5, Duration::from_secs(60)))
        .unwrap();
    for name in ["speech", "llm"] {
        engine.register_service(
            name,
            MockUnit::new(name, &log)
                .with_capabilities(UnitCapabilities::none().with_status())
                .with_health(HealthState::Offline)
                .arc(),
        );
    }

    engine.poll_once().await;

    assert_eq!(engine.get_recovery_history(None).len(), 2);
    let speech = engine.get_recovery_history(Some("speech"));
    assert_eq!(speech.len(), 1);
    assert!(speech.contains_key(&AttemptKey::new("speech", "offline_restart")));
    assert!(engine.get_recovery_history(Some("nobody")).is_empty());

    engine.unregister_service("llm").unwrap();
    assert_eq!(engine.registered_services(), vec!["speech"]);
    assert!(engine.get_recovery_history(Some("llm")).is_empty());
    assert_eq!(engine.get_recovery_history(None).len(), 1);
}

#[tokio::test]
async fn test_duplicate_rule_names_are_rejected() {
    let engine = RecoveryEngine::new(RecoveryConfig::default());
    let err = engine
        .add_rule(RecoveryRule::new("service_offline_restart", RecoveryAction::NotifyAdmin))
        .unwrap_err();
    assert!(err.to_string().contains("service_offline_restart"));
    assert_eq!(engine.rules().len(), 5);
}

#[tokio::test]
async fn test_poll_once_visits_every_unit_while_idle() {
    let log = event_log();
    let engine = RecoveryEngine::new(fast_recovery_config());
    engine
        .add_rule(
            RecoveryRule::new("offline_notify", RecoveryAction::NotifyAdmin)
                .when(|s| s.health == HealthState::Offline)
                .max_attempts(10),
        )
        .unwrap();
    for name in ["a", "b", "c"] {
        engine.register_service(
            name,
            MockUnit::new(name, &log)
                .with_capabilities(UnitCapabilities::none().with_status())
                .with_health(HealthState::Offline)
                .arc(),
        );
    }

    let outcomes = engine.poll_once().await;
    assert_eq!(outcomes.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    assert!(outcomes.values().all(|o| o.executed().is_some()));

    engine.start_monitoring().unwrap();
    engine.stop_monitoring().await;
    assert_eq!(engine.poll_once().await.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_long_cooldown_outlives_history_retention() {
    let log = event_log();
    let engine = RecoveryEngine::new(RecoveryConfig {
        history_retention_ms: 3_600_000,
        ..fast_recovery_config()
    });
    engine
        .add_rule(offline_restart_rule(1, Duration::from_secs(7200)))
        .unwrap();
    let unit = MockUnit::new("speech", &log)
        .with_capabilities(UnitCapabilities::none().with_status())
        .with_health(HealthState::Offline)
        .arc();
    engine.register_service("speech", unit.clone());

    assert!(engine.poll_once().await["speech"].executed().is_some());
    tokio::time::advance(Duration::from_secs(3601)).await;
    assert!(matches!(
        engine.poll_once().await["speech"],
        PollOutcome::Suppressed { recent_attempts: 1, .. }
    ));
    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(matches!(
        engine.poll_once().await["speech"],
        PollOutcome::Suppressed { .. }
    ));
    assert_eq!(unit.count(&unit.starts), 1);

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert!(engine.poll_once().await["speech"].executed().is_some());
}
