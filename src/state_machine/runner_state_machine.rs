use super::errors::{StateMachineError, StateMachineResult};
use super::events::RunnerEvent;
use super::states::RunnerStatus;

/// Pure transition table for runner statuses.
///
/// Persistence lives in the runner store; this type only answers "what is
/// the next status for this event, and is the move legal".
#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerStateMachine;

impl RunnerStateMachine {
    /// Determine the target status for an event against the current status.
    pub fn determine_target_status(
        current: RunnerStatus,
        event: &RunnerEvent,
    ) -> StateMachineResult<RunnerStatus> {
        use RunnerStatus::*;

        // Terminal runners admit no transitions at all.
        if current.is_terminal() {
            return Err(StateMachineError::InvalidTransition {
                from: Some(current.to_string()),
                event: format!("{event:?}"),
            });
        }

        let target = match (current, event) {
            (Starting, RunnerEvent::Enqueue) => Queued,
            // Re-entered deploys may already be in progress; the move is a
            // no-op, not an error.
            (Starting | Queued | Initiated | InProgress, RunnerEvent::Progress) => InProgress,
            (Starting, RunnerEvent::Submit) => Starting,

            (InProgress | Starting | Queued | Initiated, RunnerEvent::Succeed) => Succeeded,
            (_, RunnerEvent::Fail(_)) => Failed,
            (_, RunnerEvent::Supersede) => Failed,
            (_, RunnerEvent::TimeOut) => TimedOut,
            (_, RunnerEvent::Abort) => Aborted,
            (_, RunnerEvent::Cancel) => Cancelled,

            (from, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from.to_string()),
                    event: format!("{event:?}"),
                })
            }
        };

        Ok(target)
    }

    /// A plain (non force-abort) cancel is only legal while the pod may
    /// still be running; everything else requires force-abort.
    pub fn check_cancel_guard(
        current: RunnerStatus,
        force_abort: bool,
    ) -> StateMachineResult<()> {
        if force_abort {
            return Ok(());
        }
        if current.is_terminal() {
            return Err(StateMachineError::GuardFailure(format!(
                "runner already terminal in status {current}"
            )));
        }
        if !current.pod_may_be_running() {
            return Err(StateMachineError::GuardFailure(format!(
                "cannot cancel runner in status {current} without force abort"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_deploy_transitions() {
        let s = RunnerStateMachine::determine_target_status(
            RunnerStatus::Initiated,
            &RunnerEvent::Progress,
        )
        .unwrap();
        assert_eq!(s, RunnerStatus::InProgress);
        let s = RunnerStateMachine::determine_target_status(s, &RunnerEvent::Succeed).unwrap();
        assert_eq!(s, RunnerStatus::Succeeded);
    }

    #[test]
    fn test_terminal_rejects_everything() {
        for terminal in [
            RunnerStatus::Succeeded,
            RunnerStatus::Failed,
            RunnerStatus::Cancelled,
        ] {
            let err = RunnerStateMachine::determine_target_status(
                terminal,
                &RunnerEvent::Progress,
            );
            assert!(err.is_err());
        }
    }

    #[test]
    fn test_supersede_maps_to_failed() {
        let s = RunnerStateMachine::determine_target_status(
            RunnerStatus::InProgress,
            &RunnerEvent::Supersede,
        )
        .unwrap();
        assert_eq!(s, RunnerStatus::Failed);
    }

    #[test]
    fn test_cancel_guard() {
        assert!(RunnerStateMachine::check_cancel_guard(RunnerStatus::InProgress, false).is_ok());
        assert!(RunnerStateMachine::check_cancel_guard(RunnerStatus::Initiated, false).is_err());
        assert!(RunnerStateMachine::check_cancel_guard(RunnerStatus::Initiated, true).is_ok());
        assert!(RunnerStateMachine::check_cancel_guard(RunnerStatus::Succeeded, false).is_err());
    }
}
