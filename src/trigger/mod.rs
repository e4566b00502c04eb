//! The CD handler: manual and automatic deploy triggers, pre/post stage
//! submission, cancellation, and the idempotent deploy-path algorithm.

mod cancel;
mod errors;
mod event;
mod outcome;
mod service;
mod stage;

pub use errors::TriggerError;
pub use event::{TriggerDecision, TriggerEvent};
pub use outcome::{BlockReason, FeasibilityOutcome, TriggerOutcome};
pub use service::{
    BuiltManifest, DeployRequestDispatcher, DeployTriggerRequest, ManifestBuilder, TriggerService,
};
pub use stage::{StageSpec, StageStep, StageTriggerOutcome, StageTriggerRequest};
