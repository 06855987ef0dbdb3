//! # Unit Lifecycle State Machine
//!
//! Lifecycle states of managed units and the transitions the lifecycle
//! controller is allowed to drive between them.

pub mod states;

pub use states::LifecycleState;
