use serde::{Deserialize, Serialize};

/// Events that drive runner status transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerEvent {
    /// Workload submitted to the executor
    Submit,
    /// Executor accepted the workload into its queue
    Enqueue,
    /// Deploy path moved past manifest preparation
    Progress,
    Succeed,
    Fail(String),
    /// Operator abort (force)
    Abort,
    /// Operator cancellation
    Cancel,
    TimeOut,
    /// A newer trigger on the same pipeline overrode this runner
    Supersede,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serde() {
        let event = RunnerEvent::Fail("submit refused".to_string());
        let json = serde_json::to_string(&event).unwrap();
        let parsed: RunnerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
