//! Night-shift runner: engine, run guard, process supervisor and the stage
//! transition policy.

pub mod engine;
pub mod guard;
pub mod supervisor;
pub mod transition;

pub use engine::{Collaborators, RunOutcome, RunStatus, RunnerEngine, RunnerSettings, RunnerState};
pub use guard::{RunClaim, RunGuard};
pub use supervisor::{
    AttemptExit, AttemptReport, AttemptRequest, CliSupervisor, ProcessSupervisor, build_args,
};
pub use transition::{AttemptOutcome, RetryBudget, Transition, next_transition};
