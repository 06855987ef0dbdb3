#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Supervisor Core
//!
//! In-process supervision for the long-running subsystems of a host
//! application: speech engines, model backends, automation workers and
//! anything else that can be started, stopped and asked how it is doing.
//!
//! ## Architecture
//!
//! Two independent subsystems share only the [`unit::ManagedUnit`] trait:
//!
//! - [`lifecycle::LifecycleController`] registers units with dependencies
//!   and a startup rank, starts them in order behind a dependency check,
//!   stops them in reverse, and restarts units whose health checks keep
//!   failing.
//! - [`recovery::RecoveryEngine`] polls status snapshots of its own set of
//!   units, matches prioritized recovery rules with per-rule cooldowns, and
//!   runs compensating actions through whichever hooks a unit declares.
//!
//! A host may hand both the same [`unit::UnitLocks`] so lifecycle calls on
//! one unit never interleave between them.
//!
//! ## Module Organization
//!
//! - [`unit`] - managed unit trait, capabilities, status snapshots, locks
//! - [`lifecycle`] - registry, start/stop ordering, health monitor
//! - [`recovery`] - rules, attempt ledger, action executor, polling loop
//! - [`state_machine`] - lifecycle states and legal transitions
//! - [`config`] - intervals, thresholds and timeouts
//! - [`error`] - structured error handling
//! - [`logging`] - structured tracing setup and audit events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use supervisor_core::config::SupervisorConfig;
//! use supervisor_core::lifecycle::LifecycleController;
//! use supervisor_core::recovery::RecoveryEngine;
//! # use supervisor_core::unit::ManagedUnit;
//! # struct Database;
//! # #[async_trait::async_trait]
//! # impl ManagedUnit for Database {
//! #     async fn start(&self) -> anyhow::Result<()> { Ok(()) }
//! #     async fn stop(&self) -> anyhow::Result<()> { Ok(()) }
//! # }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SupervisorConfig::from_env()?;
//! let controller = LifecycleController::new(config.lifecycle.clone());
//! let engine = RecoveryEngine::with_unit_locks(config.recovery.clone(), controller.unit_locks());
//!
//! let database: Arc<dyn ManagedUnit> = Arc::new(Database);
//! controller.register("database", database.clone(), &[], 10)?;
//! engine.register_service("database", database);
//!
//! let report = controller.start_all(false).await;
//! if report.succeeded() {
//!     engine.start_monitoring()?;
//! }
//!
//! engine.stop_monitoring().await;
//! controller.stop_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod recovery;
pub mod state_machine;
pub mod unit;

pub use config::{LifecycleConfig, RecoveryConfig, SupervisorConfig};
pub use error::{Result, SupervisorError};
pub use lifecycle::{LifecycleController, StartReport, StopReport, SystemHealth, UnitInfo};
pub use logging::init_structured_logging;
pub use recovery::{PollOutcome, RecoveryAction, RecoveryEngine, RecoveryRule};
pub use state_machine::LifecycleState;
pub use unit::{HealthState, ManagedUnit, StatusSnapshot, UnitCapabilities, UnitLocks};
