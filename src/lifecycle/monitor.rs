//! Periodic health monitor for running units.

use std::sync::atomic::Ordering;
use tracing::{debug, error, info, warn};

use super::LifecycleController;
use crate::error::{Result, UnitOperation};
use crate::logging::log_health_check_failure;
use crate::unit::bounded_call;

impl LifecycleController {
    /// Check every running unit that declares a health check once.
    ///
    /// Returns the units for which a restart was triggered. Restarts run as
    /// detached tasks so one slow unit does not hold up the others.
    pub async fn run_health_checks(&self) -> Vec<String> {
        self.health_cycle(false).await
    }

    /// One health cycle; the background loop passes `cooperative` so the
    /// cycle ends early once shutdown is signalled
    async fn health_cycle(&self, cooperative: bool) -> Vec<String> {
        let threshold = self.config.failure_threshold;
        let mut restarts = Vec::new();

        for (name, handle) in self.registry.health_check_targets() {
            if cooperative && self.shutdown.load(Ordering::Acquire) {
                debug!("Shutdown requested, ending health cycle early");
                break;
            }

            let failure = match bounded_call(
                &name,
                UnitOperation::HealthCheck,
                self.config.health_check_timeout(),
                handle.health_check(),
            )
            .await
            {
                Ok(true) => None,
                Ok(false) => Some("health check reported unhealthy".to_string()),
                Err(e) => Some(e.to_string()),
            };

            let Some(details) = failure else {
                self.registry.record_health_success(&name);
                continue;
            };

            let Some(recorded) = self.registry.record_health_failure(&name, threshold) else {
                continue;
            };
            log_health_check_failure(&name, recorded.consecutive, threshold, Some(&details));

            if recorded.threshold_reached {
                warn!(
                    unit = %name,
                    consecutive_failures = recorded.consecutive,
                    "🏥 LIFECYCLE: Failure threshold reached, restarting unit"
                );
                let controller = self.clone();
                let unit = name.clone();
                tokio::spawn(async move {
                    if let Err(e) = controller.health_restart(&unit, cooperative).await {
                        error!(unit = %unit, error = %e, "Health-triggered restart failed");
                    }
                });
                restarts.push(name);
            }
        }

        restarts
    }

    /// Restart issued after repeated failed checks. A restart from the
    /// background loop is dropped if shutdown began before it got the lock.
    pub(super) async fn health_restart(&self, name: &str, cooperative: bool) -> Result<()> {
        let _guard = self.locks.acquire(name).await;
        if cooperative && self.shutdown.load(Ordering::Acquire) {
            info!(unit = %name, "Skipping health-triggered restart, shutdown in progress");
            return Ok(());
        }
        self.restart_locked(name).await
    }

    /// Launch the background health loop if it is not already running
    pub(super) fn start_health_monitor(&self) {
        let mut monitor = self.monitor.lock();
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Health monitor already running");
            return;
        }

        self.shutdown.store(false, Ordering::Release);
        *monitor = Some(tokio::spawn(run(self.clone())));
        info!(
            interval_ms = self.config.health_check_interval_ms,
            "🏥 LIFECYCLE: Health monitor started"
        );
    }

    /// Signal the health loop and wait for its current iteration to end
    pub(super) async fn stop_health_monitor(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_waiters();

        let handle = self.monitor.lock().take();
        let Some(handle) = handle else {
            return;
        };

        let grace = self.config.health_check_timeout() * 2;
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => info!("🏥 LIFECYCLE: Health monitor stopped"),
            Ok(Err(e)) => error!("Health monitor task ended abnormally: {}", e),
            Err(_) => warn!(
                grace_ms = grace.as_millis() as u64,
                "Health monitor still busy after shutdown signal, detaching"
            ),
        }
    }
}

async fn run(controller: LifecycleController) {
    loop {
        let notified = controller.shutdown_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if controller.shutdown.load(Ordering::Acquire) {
            break;
        }

        // A panic inside the cycle task surfaces as a JoinError and backs off
        // the loop; with `panic = "abort"` it ends the process instead.
        let cycle = controller.clone();
        let delay = match tokio::spawn(async move { cycle.health_cycle(true).await }).await {
            Ok(_) => controller.config.health_check_interval(),
            Err(e) => {
                error!("Health check cycle failed: {}", e);
                controller.config.loop_error_backoff()
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut notified => break,
        }
    }

    debug!(controller_id = %controller.id, "Health monitor loop exited");
}
