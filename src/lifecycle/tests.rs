use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::unit::UnitCapabilities;

#[derive(Default)]
struct Probe {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: bool,
    fail_stop: bool,
    healthy: AtomicBool,
    capabilities: UnitCapabilities,
}

impl Probe {
    fn healthy() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
            ..Default::default()
        })
    }
}

#[async_trait]
impl ManagedUnit for Probe {
    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            anyhow::bail!("port already in use");
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            anyhow::bail!("stop refused");
        }
        Ok(())
    }

    fn capabilities(&self) -> UnitCapabilities {
        self.capabilities
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        anyhow::bail!("status endpoint unreachable")
    }
}

fn fast_config() -> LifecycleConfig {
    LifecycleConfig {
        health_check_interval_ms: 20,
        health_check_timeout_ms: 50,
        restart_settle_ms: 1,
        start_timeout_ms: 200,
        stop_timeout_ms: 200,
        status_timeout_ms: 50,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_register_with_factory_failure_is_isolated() {
    let controller = LifecycleController::new(fast_config());

    let err = controller
        .register_with("speech", || Err(anyhow::anyhow!("model file missing")), &[], 10)
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Registration { .. }));
    assert!(err.to_string().contains("model file missing"));

    controller
        .register_with("llm", || Ok(Probe::healthy() as Arc<dyn ManagedUnit>), &[], 20)
        .unwrap();
    assert_eq!(controller.unit_names(), vec!["llm"]);
}

#[tokio::test]
async fn test_already_running_unit_counts_as_started() {
    let controller = LifecycleController::new(fast_config());
    let unit = Probe::healthy();
    controller.register("db", unit.clone(), &[], 10).unwrap();

    assert!(controller.start_all(false).await.succeeded());
    let second = controller.start_all(false).await;

    assert_eq!(second.started, vec!["db"]);
    assert_eq!(unit.starts.load(Ordering::SeqCst), 1);
    controller.stop_all().await;
}

#[tokio::test]
async fn test_stop_failure_moves_unit_to_error_and_continues() {
    let controller = LifecycleController::new(fast_config());
    let stubborn = Arc::new(Probe {
        fail_stop: true,
        ..Default::default()
    });
    let db = Probe::healthy();
    controller.register("db", db.clone(), &[], 10).unwrap();
    controller.register("cache", stubborn, &["db"], 20).unwrap();

    controller.start_all(false).await;
    let report = controller.stop_all().await;

    assert_eq!(report.order, vec!["cache", "db"]);
    assert_eq!(report.failed_units(), vec!["cache"]);
    assert_eq!(controller.unit_state("cache").unwrap(), LifecycleState::Error);
    assert_eq!(controller.unit_state("db").unwrap(), LifecycleState::Stopped);
    assert_eq!(db.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stopped_units_are_skipped_on_stop() {
    let controller = LifecycleController::new(fast_config());
    let unit = Probe::healthy();
    controller.register("idle", unit.clone(), &[], 10).unwrap();

    let report = controller.stop_all().await;
    assert_eq!(report.order, vec!["idle"]);
    assert!(report.stopped.is_empty());
    assert_eq!(unit.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unregister_requires_inactive_unit() {
    let controller = LifecycleController::new(fast_config());
    controller.register("db", Probe::healthy(), &[], 10).unwrap();
    controller.start_all(false).await;

    assert!(matches!(
        controller.unregister("db"),
        Err(SupervisorError::InvalidState { .. })
    ));

    controller.stop_all().await;
    controller.unregister("db").unwrap();
    assert_eq!(
        controller.unregister("db"),
        Err(SupervisorError::UnitNotFound("db".to_string()))
    );
}

#[tokio::test]
async fn test_restart_counts_and_cycles_unit() {
    let controller = LifecycleController::new(fast_config());
    let unit = Probe::healthy();
    controller.register("llm", unit.clone(), &[], 10).unwrap();
    controller.start_all(false).await;

    controller.restart("llm").await.unwrap();

    let info = controller.unit_record("llm").unwrap();
    assert_eq!(info.restart_count, 1);
    assert_eq!(info.state, LifecycleState::Running);
    assert_eq!(unit.starts.load(Ordering::SeqCst), 2);
    assert_eq!(unit.stops.load(Ordering::SeqCst), 1);
    controller.stop_all().await;
}

#[tokio::test]
async fn test_status_synthesized_and_failed_status_is_offline() {
    let controller = LifecycleController::new(fast_config());
    controller.register("plain", Probe::healthy(), &[], 10).unwrap();
    controller
        .register(
            "reporting",
            Arc::new(Probe {
                capabilities: UnitCapabilities::none().with_status(),
                ..Default::default()
            }),
            &[],
            20,
        )
        .unwrap();

    let plain = controller.get_status("plain").await.unwrap();
    assert_eq!(plain.health, HealthState::Offline);
    assert_eq!(plain.details["state"], "stopped");

    controller.start_all(true).await;
    assert_eq!(
        controller.get_status("plain").await.unwrap().health,
        HealthState::Healthy
    );

    let reporting = controller.get_status("reporting").await.unwrap();
    assert_eq!(reporting.health, HealthState::Offline);
    assert!(reporting.error_contains("unreachable"));

    let health = controller.system_health().await;
    assert_eq!(health.total_units, 2);
    assert_eq!(health.healthy_units, 1);
    assert_eq!(health.overall, HealthState::Unhealthy);

    assert!(matches!(
        controller.get_status("ghost").await,
        Err(SupervisorError::UnitNotFound(_))
    ));
    controller.stop_all().await;
}

#[tokio::test]
async fn test_system_health_with_no_units_is_offline() {
    let controller = LifecycleController::new(fast_config());
    let health = controller.system_health().await;
    assert_eq!(health.overall, HealthState::Offline);
    assert_eq!(health.total_units, 0);
}

#[tokio::test]
async fn test_health_monitor_runs_only_after_clean_start() {
    let controller = LifecycleController::new(fast_config());
    controller
        .register(
            "broken",
            Arc::new(Probe {
                fail_start: true,
                ..Default::default()
            }),
            &[],
            10,
        )
        .unwrap();

    let report = controller.start_all(false).await;
    assert!(report.aborted);
    assert!(!controller.is_monitoring());

    let report = controller.start_all(true).await;
    assert!(!report.aborted);
    assert!(report.succeeded());
    assert!(controller.is_monitoring());

    controller.stop_all().await;
    assert!(!controller.is_monitoring());
}

#[tokio::test]
async fn test_successful_check_resets_counter() {
    let mut config = fast_config();
    config.failure_threshold = 3;
    let controller = LifecycleController::new(config);
    let unit = Arc::new(Probe {
        capabilities: UnitCapabilities::none().with_health_check(),
        ..Default::default()
    });
    controller.register("llm", unit.clone(), &[], 10).unwrap();
    controller.start_unit("llm").await.unwrap();

    controller.run_health_checks().await;
    controller.run_health_checks().await;
    assert_eq!(controller.unit_record("llm").unwrap().consecutive_health_failures, 2);

    unit.healthy.store(true, Ordering::SeqCst);
    assert!(controller.run_health_checks().await.is_empty());

    let info = controller.unit_record("llm").unwrap();
    assert_eq!(info.consecutive_health_failures, 0);
    assert!(info.last_health_check.is_some());
    assert_eq!(info.restart_count, 0);
}

#[tokio::test]
async fn test_hung_health_check_counts_as_failure() {
    struct Hung;

    #[async_trait]
    impl ManagedUnit for Hung {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn capabilities(&self) -> UnitCapabilities {
            UnitCapabilities::none().with_health_check()
        }

        async fn health_check(&self) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
    }

    let controller = LifecycleController::new(fast_config());
    controller.register("hung", Arc::new(Hung), &[], 10).unwrap();
    controller.start_unit("hung").await.unwrap();

    controller.run_health_checks().await;
    assert_eq!(
        controller.unit_record("hung").unwrap().consecutive_health_failures,
        1
    );
}

#[tokio::test]
async fn test_default_rank_starts_after_explicit_ranks() {
    let controller = LifecycleController::new(fast_config());
    controller
        .register_default("assistant", Probe::healthy(), &["database"])
        .unwrap();
    controller.register("database", Probe::healthy(), &[], 10).unwrap();
    controller.register("late", Probe::healthy(), &[], 500).unwrap();

    assert_eq!(
        controller.unit_record("assistant").unwrap().startup_rank,
        DEFAULT_STARTUP_RANK
    );
    let report = controller.start_all(false).await;
    assert_eq!(report.order, vec!["database", "assistant", "late"]);
    assert!(report.succeeded());
    controller.stop_all().await;
}

#[test]
fn test_unknown_and_degraded_units_fold_to_degraded() {
    let mut units = BTreeMap::new();
    units.insert("db".to_string(), StatusSnapshot::new("db", HealthState::Healthy));
    units.insert("llm".to_string(), StatusSnapshot::new("llm", HealthState::Degraded));
    units.insert("cron".to_string(), StatusSnapshot::new("cron", HealthState::Unknown));
    assert_eq!(SystemHealth::from_snapshots(units.clone()).overall, HealthState::Degraded);

    units.insert("tts".to_string(), StatusSnapshot::new("tts", HealthState::Offline));
    let health = SystemHealth::from_snapshots(units);
    assert_eq!(health.overall, HealthState::Unhealthy);
    assert_eq!(health.healthy_units, 1);
}

#[tokio::test]
async fn test_monitor_restart_after_shutdown_leaves_unit_stopped() {
    let controller = LifecycleController::new(fast_config());
    let unit = Probe::healthy();
    controller.register("speech", unit.clone(), &[], 10).unwrap();

    assert!(controller.start_all(false).await.succeeded());
    assert!(controller.stop_all().await.is_clean());

    controller.health_restart("speech", true).await.unwrap();
    assert_eq!(controller.unit_state("speech").unwrap(), LifecycleState::Stopped);
    assert_eq!(unit.starts.load(Ordering::SeqCst), 1);
    assert_eq!(controller.unit_record("speech").unwrap().restart_count, 0);

    // a restart from a manual health pass is not tied to the monitor
    controller.health_restart("speech", false).await.unwrap();
    assert_eq!(controller.unit_state("speech").unwrap(), LifecycleState::Running);
    assert_eq!(unit.starts.load(Ordering::SeqCst), 2);
    controller.stop_all().await;
}
