//! # Supervisor Demo Host
//!
//! Registers a few in-memory units with both the lifecycle controller and
//! the recovery engine, lets them run for a short while (one of them goes
//! offline on purpose), prints the aggregate status as JSON and shuts down.
//!
//! Configuration comes from `SUPERVISOR__*` environment variables, for
//! example `SUPERVISOR__RECOVERY__POLL_INTERVAL_MS=500`. The first argument,
//! if given, is the run time in seconds.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use supervisor_core::config::SupervisorConfig;
use supervisor_core::lifecycle::LifecycleController;
use supervisor_core::logging::init_structured_logging;
use supervisor_core::recovery::RecoveryEngine;
use supervisor_core::unit::{HealthState, ManagedUnit, StatusSnapshot, UnitCapabilities};

/// In-memory unit whose health can be flipped from outside
struct DemoUnit {
    name: &'static str,
    health: Mutex<HealthState>,
    starts: AtomicU32,
}

impl DemoUnit {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            health: Mutex::new(HealthState::Offline),
            starts: AtomicU32::new(0),
        })
    }

    fn set_health(&self, health: HealthState) {
        *self.health.lock() = health;
    }
}

#[async_trait]
impl ManagedUnit for DemoUnit {
    async fn start(&self) -> anyhow::Result<()> {
        let starts = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.set_health(HealthState::Healthy);
        info!(unit = self.name, starts = starts, "demo unit started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.set_health(HealthState::Offline);
        info!(unit = self.name, "demo unit stopped");
        Ok(())
    }

    fn capabilities(&self) -> UnitCapabilities {
        UnitCapabilities::none().with_status().with_health_check()
    }

    async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        Ok(StatusSnapshot::new(self.name, *self.health.lock())
            .with_detail("starts", self.starts.load(Ordering::SeqCst)))
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        Ok(self.health.lock().is_operational())
    }
}

#[tokio::main]
async fn main() {
    init_structured_logging();

    let config = match SupervisorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Invalid supervisor configuration: {}", e);
            process::exit(1);
        }
    };

    let run_for = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(5));

    if let Err(e) = run(config, run_for).await {
        error!("❌ Demo failed: {}", e);
        process::exit(1);
    }
}

async fn run(config: SupervisorConfig, run_for: Duration) -> anyhow::Result<()> {
    let controller = LifecycleController::new(config.lifecycle.clone());
    let engine = Arc::new(RecoveryEngine::with_unit_locks(
        config.recovery.clone(),
        controller.unit_locks(),
    ));

    let database = DemoUnit::new("database");
    let speech = DemoUnit::new("speech");
    let assistant = DemoUnit::new("assistant");

    controller.register("database", database.clone(), &[], 10)?;
    controller.register("speech", speech.clone(), &["database"], 20)?;
    controller.register("assistant", assistant.clone(), &["database", "speech"], 30)?;
    controller.register_default("recovery_engine", engine.clone(), &[])?;

    engine.register_service("database", database.clone());
    engine.register_service("speech", speech.clone());
    engine.register_service("assistant", assistant.clone());

    let report = controller.start_all(false).await;
    if !report.succeeded() {
        warn!(failed = ?report.failed_units(), "Start pass failed, shutting down");
        controller.stop_all().await;
        anyhow::bail!("{} unit(s) failed to start", report.failed.len());
    }

    tokio::time::sleep(run_for / 2).await;
    info!("💥 Taking 'speech' offline behind the supervisor's back");
    speech.set_health(HealthState::Offline);
    tokio::time::sleep(run_for / 2).await;

    let health = controller.system_health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    println!("{}", serde_json::to_string_pretty(&engine.recovery_stats())?);

    let stop = controller.stop_all().await;
    if !stop.is_clean() {
        warn!(failed = ?stop.failed_units(), "Some units did not stop cleanly");
    }
    Ok(())
}
