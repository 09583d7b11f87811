//! Stage transition policy.
//!
//! ```text
//! plan  --success-->   code
//! code  --success-->   audit
//! audit --accepted-->  completed
//! audit --needs work-> code
//! any   --failed-->    same stage (terminal once attempts > ceiling)
//! any   --crashed-->   terminal
//! ```

use crate::errors::TransitionError;
use crate::task::Stage;

/// What one attempt amounted to, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Plan or code attempt finished cleanly
    Success,
    /// Audit accepted the work
    Accepted,
    /// Audit asked for rework
    NeedsWork,
    /// Recoverable failure (timeout, limit, exit code, unparsable output)
    Failed,
    /// The attempt could not run at all
    Crashed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Accepted => "accepted",
            Self::NeedsWork => "needs_work",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the task goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move forward to an executable stage and keep going
    Advance(Stage),
    /// Audit sent the task back to an earlier stage
    SendBack(Stage),
    /// Reached `completed`
    Complete,
    /// Stay at the current stage and try again
    Retry,
    /// Failed with the attempts counter past the ceiling; left at its stage
    Exhausted,
    /// Crashed; never retried
    Abort,
}

impl Transition {
    /// Stage to persist for a task that was at `current`.
    pub fn next_stage(&self, current: Stage) -> Stage {
        match self {
            Self::Advance(stage) | Self::SendBack(stage) => *stage,
            Self::Complete => Stage::Completed,
            Self::Retry | Self::Exhausted | Self::Abort => current,
        }
    }

    /// Label recorded in the run report for this step.
    pub fn label(&self, current: Stage) -> String {
        match self {
            Self::Advance(stage) | Self::SendBack(stage) => stage.as_str().to_string(),
            Self::Complete => Stage::Completed.as_str().to_string(),
            Self::Retry => format!("{} (retry)", current),
            Self::Exhausted | Self::Abort => "failed".to_string(),
        }
    }
}

/// Retry ceiling applied to failed attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// The task's attempts counter, including the attempt just made
    pub attempts: u32,
    pub max_attempts: u32,
}

impl RetryBudget {
    fn exhausted(&self) -> bool {
        self.attempts > self.max_attempts
    }
}

/// Decide the next step for a task at `stage` whose attempt ended in `outcome`.
///
/// Every `(stage, outcome)` pair is listed; pairs that cannot occur are
/// errors rather than silent defaults.
pub fn next_transition(
    stage: Stage,
    outcome: AttemptOutcome,
    budget: RetryBudget,
) -> Result<Transition, TransitionError> {
    use AttemptOutcome as O;

    let unexpected = || TransitionError::Unexpected {
        stage,
        outcome: outcome.as_str(),
    };
    let on_failure = || {
        if budget.exhausted() {
            Transition::Exhausted
        } else {
            Transition::Retry
        }
    };

    match (stage, outcome) {
        (Stage::Inbox, O::Success | O::Accepted | O::NeedsWork | O::Failed | O::Crashed)
        | (Stage::Completed, O::Success | O::Accepted | O::NeedsWork | O::Failed | O::Crashed) => {
            Err(TransitionError::NotExecutable(stage))
        }

        (Stage::Plan, O::Success) => Ok(Transition::Advance(Stage::Code)),
        (Stage::Code, O::Success) => Ok(Transition::Advance(Stage::Audit)),
        (Stage::Audit, O::Accepted) => Ok(Transition::Complete),
        (Stage::Audit, O::NeedsWork) => Ok(Transition::SendBack(Stage::Code)),

        (Stage::Plan | Stage::Code | Stage::Audit, O::Failed) => Ok(on_failure()),
        (Stage::Plan | Stage::Code | Stage::Audit, O::Crashed) => Ok(Transition::Abort),

        (Stage::Plan | Stage::Code, O::Accepted | O::NeedsWork) | (Stage::Audit, O::Success) => {
            Err(unexpected())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRESH: RetryBudget = RetryBudget {
        attempts: 1,
        max_attempts: 3,
    };

    #[test]
    fn happy_path_edges() {
        assert_eq!(
            next_transition(Stage::Plan, AttemptOutcome::Success, FRESH),
            Ok(Transition::Advance(Stage::Code))
        );
        assert_eq!(
            next_transition(Stage::Code, AttemptOutcome::Success, FRESH),
            Ok(Transition::Advance(Stage::Audit))
        );
        assert_eq!(
            next_transition(Stage::Audit, AttemptOutcome::Accepted, FRESH),
            Ok(Transition::Complete)
        );
    }

    #[test]
    fn needs_work_goes_back_to_code() {
        let t = next_transition(Stage::Audit, AttemptOutcome::NeedsWork, FRESH).unwrap();
        assert_eq!(t, Transition::SendBack(Stage::Code));
        assert_eq!(t.next_stage(Stage::Audit), Stage::Code);
        assert_eq!(t.label(Stage::Audit), "code");
    }

    #[test]
    fn failure_retries_until_ceiling_exceeded() {
        let at_ceiling = RetryBudget {
            attempts: 3,
            max_attempts: 3,
        };
        let past_ceiling = RetryBudget {
            attempts: 4,
            max_attempts: 3,
        };
        for stage in [Stage::Plan, Stage::Code, Stage::Audit] {
            let retry = next_transition(stage, AttemptOutcome::Failed, at_ceiling).unwrap();
            assert_eq!(retry, Transition::Retry);
            assert_eq!(retry.next_stage(stage), stage);

            let done = next_transition(stage, AttemptOutcome::Failed, past_ceiling).unwrap();
            assert_eq!(done, Transition::Exhausted);
            assert_eq!(done.next_stage(stage), stage);
        }
    }

    #[test]
    fn crash_is_terminal_without_retry() {
        for stage in [Stage::Plan, Stage::Code, Stage::Audit] {
            let t = next_transition(stage, AttemptOutcome::Crashed, FRESH).unwrap();
            assert_eq!(t, Transition::Abort);
            assert_eq!(t.next_stage(stage), stage);
            assert_eq!(t.label(stage), "failed");
        }
    }

    #[test]
    fn impossible_pairs_fail_loudly() {
        assert_eq!(
            next_transition(Stage::Audit, AttemptOutcome::Success, FRESH),
            Err(TransitionError::Unexpected {
                stage: Stage::Audit,
                outcome: "success"
            })
        );
        assert!(next_transition(Stage::Plan, AttemptOutcome::Accepted, FRESH).is_err());
        assert!(next_transition(Stage::Code, AttemptOutcome::NeedsWork, FRESH).is_err());
    }

    #[test]
    fn non_executable_stages_are_rejected() {
        for stage in [Stage::Inbox, Stage::Completed] {
            assert_eq!(
                next_transition(stage, AttemptOutcome::Success, FRESH),
                Err(TransitionError::NotExecutable(stage))
            );
        }
    }

    #[test]
    fn labels() {
        assert_eq!(Transition::Complete.label(Stage::Audit), "completed");
        assert_eq!(Transition::Retry.label(Stage::Plan), "plan (retry)");
        assert_eq!(Transition::Advance(Stage::Audit).label(Stage::Code), "audit");
    }
}
