//! First-class results of trigger attempts.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::timeline::TimelineStatus;

/// What happened to a trigger request. Callers branch on this instead of
/// decoding error strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerOutcome {
    /// The deploy ran to completion; `release_no` is the pipeline's
    /// monotonically increasing release counter.
    Completed { release_no: i32 },
    /// A previous attempt already got this runner past the requested step.
    Skipped { reason: String },
    /// Accepted and handed to the durable async dispatcher.
    Dispatched { user_deployment_request_id: i32 },
    /// A newer trigger on the same pipeline won.
    Superseded,
}

/// Result of the pre-trigger feasibility checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeasibilityOutcome {
    Allowed,
    Blocked(BlockReason),
}

impl FeasibilityOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, FeasibilityOutcome::Allowed)
    }
}

/// Why a feasibility gate refused the deploy. Each reason maps to one
/// terminal timeline tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockReason {
    Vulnerability { digest: String },
    GitOpsNotConfigured { app_name: String },
}

impl BlockReason {
    pub fn timeline_status(&self) -> TimelineStatus {
        match self {
            BlockReason::Vulnerability { .. } => TimelineStatus::FoundVulnerability,
            BlockReason::GitOpsNotConfigured { .. } => TimelineStatus::GitopsRepoNotConfigured,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Vulnerability { digest } => {
                write!(f, "found vulnerability for image digest {digest}")
            }
            BlockReason::GitOpsNotConfigured { app_name } => {
                write!(f, "gitops repository is not configured for app {app_name}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feasibility_allowed() {
        assert!(FeasibilityOutcome::Allowed.is_allowed());
        assert!(!FeasibilityOutcome::Blocked(BlockReason::Vulnerability {
            digest: "sha256:deadbeef".to_string()
        })
        .is_allowed());
    }

    #[test]
    fn test_block_reason_timeline_tags() {
        assert_eq!(
            BlockReason::Vulnerability {
                digest: "sha256:d".to_string()
            }
            .timeline_status(),
            TimelineStatus::FoundVulnerability
        );
        assert_eq!(
            BlockReason::GitOpsNotConfigured {
                app_name: "orders".to_string()
            }
            .timeline_status(),
            TimelineStatus::GitopsRepoNotConfigured
        );
    }
}
