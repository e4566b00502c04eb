//! Runner lifecycle state management.
//!
//! The runner store persists statuses as text; this module owns the enums,
//! the legal transition table, and the cancel guard.

pub mod errors;
pub mod events;
pub mod runner_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::RunnerEvent;
pub use runner_state_machine::RunnerStateMachine;
pub use states::{DeploymentAppType, DeploymentType, ExecutorKind, RunnerStatus, StageKind};
