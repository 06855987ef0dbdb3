//! Scriptable managed unit for integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use supervisor_core::unit::{HealthState, ManagedUnit, StatusSnapshot, UnitCapabilities};

/// Shared call log so tests can assert cross-unit ordering
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub struct MockUnit {
    name: String,
    log: EventLog,
    capabilities: UnitCapabilities,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    start_delay: Mutex<Option<Duration>>,
    health: Mutex<HealthState>,
    status_error: Mutex<Option<String>>,
    /// Scripted health check results, consumed front first; empty means healthy
    health_script: Mutex<VecDeque<bool>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub health_checks: AtomicUsize,
    pub resets: AtomicUsize,
    pub cache_clears: AtomicUsize,
    pub reloads: AtomicUsize,
}

impl MockUnit {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            capabilities: UnitCapabilities::none(),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            start_delay: Mutex::new(None),
            health: Mutex::new(HealthState::Healthy),
            status_error: Mutex::new(None),
            health_script: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            health_checks: AtomicUsize::new(0),
            resets: AtomicUsize::new(0),
            cache_clears: AtomicUsize::new(0),
            reloads: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: UnitCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn failing_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_stop(self) -> Self {
        self.fail_stop.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_health(self, health: HealthState) -> Self {
        *self.health.lock() = health;
        self
    }

    pub fn with_start_delay(self, delay: Duration) -> Self {
        *self.start_delay.lock() = Some(delay);
        self
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn set_health(&self, health: HealthState) {
        *self.health.lock() = health;
    }

    pub fn set_status_error(&self, error: Option<&str>) {
        *self.status_error.lock() = error.map(str::to_string);
    }

    pub fn script_health_checks(&self, results: &[bool]) {
        self.health_script.lock().extend(results.iter().copied());
    }

    pub fn count(&self, counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", event, self.name));
    }
}

#[async_trait]
impl ManagedUnit for MockUnit {
    async fn start(&self) -> anyhow::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.record("start");
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("{} refused to start", self.name);
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.record("stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            anyhow::bail!("{} refused to stop", self.name);
        }
        Ok(())
    }

    fn capabilities(&self) -> UnitCapabilities {
        self.capabilities
    }

    async fn get_status(&self) -> anyhow::Result<StatusSnapshot> {
        if let Some(error) = self.status_error.lock().clone() {
            anyhow::bail!(error);
        }
        Ok(StatusSnapshot::new(&self.name, *self.health.lock()))
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.health_script.lock().pop_front().unwrap_or(true))
    }

    async fn reset_connection(&self) -> anyhow::Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        self.record("reset_connection");
        Ok(())
    }

    async fn clear_cache(&self) -> anyhow::Result<()> {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
        self.record("clear_cache");
        Ok(())
    }

    async fn reload_config(&self) -> anyhow::Result<()> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.record("reload_config");
        Ok(())
    }
}
