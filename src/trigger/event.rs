//! Trigger-event builder: decides, from the runner's timeline, which steps a
//! (re-)entered deploy still has to perform. This is what makes retried
//! requests idempotent.

use serde::{Deserialize, Serialize};

use crate::constants::messages;
use crate::models::timeline::TimelineStatus;
use crate::state_machine::DeploymentAppType;

/// Steps the deploy path will perform for this attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub perform_chart_push: bool,
    pub deploy_app_on_cluster: bool,
    pub triggered_by: i32,
}

/// Outcome of building a trigger event over the existing timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerDecision {
    Proceed(TriggerEvent),
    /// Nothing left to do; the reason is surfaced verbatim.
    Skip { reason: String },
    /// A terminal superseded tag is already present.
    Superseded,
}

impl TriggerEvent {
    /// Build the event for a fresh or re-entered deploy.
    ///
    /// Tags are inspected in severity order: a superseded runner stays
    /// superseded even when later bookkeeping tags exist. A completed
    /// chart push (GIT_COMMIT, or ARGOCD_SYNC_INITIATED which implies it)
    /// is never repeated; a completed manual sync (ARGOCD_SYNC_COMPLETED)
    /// suppresses the backend deploy; a completed trigger
    /// (DEPLOYMENT_TRIGGERED) makes the whole attempt a no-op.
    pub fn build(
        backend: DeploymentAppType,
        timeline: &[TimelineStatus],
        triggered_by: i32,
    ) -> TriggerDecision {
        if timeline.contains(&TimelineStatus::DeploymentSuperseded) {
            return TriggerDecision::Superseded;
        }
        if timeline.contains(&TimelineStatus::DeploymentFailed) {
            return TriggerDecision::Skip {
                reason: "deployment already failed".to_string(),
            };
        }
        if timeline.contains(&TimelineStatus::FoundVulnerability) {
            return TriggerDecision::Skip {
                reason: messages::FOUND_VULNERABILITY.to_string(),
            };
        }
        if timeline.contains(&TimelineStatus::GitopsRepoNotConfigured) {
            return TriggerDecision::Skip {
                reason: messages::GITOPS_REPO_NOT_CONFIGURED.to_string(),
            };
        }
        if timeline.contains(&TimelineStatus::DeploymentTriggered) {
            return TriggerDecision::Skip {
                reason: "deployment already triggered".to_string(),
            };
        }

        let chart_committed = timeline.contains(&TimelineStatus::GitCommit)
            || timeline.contains(&TimelineStatus::ArgocdSyncInitiated);
        let sync_completed = timeline.contains(&TimelineStatus::ArgocdSyncCompleted);
        TriggerDecision::Proceed(TriggerEvent {
            perform_chart_push: backend.uses_gitops() && !chart_committed,
            deploy_app_on_cluster: !matches!(backend, DeploymentAppType::ManifestDownload)
                && !sync_completed,
            triggered_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_argo_deploy_pushes_and_deploys() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Argocd,
            &[TimelineStatus::DeploymentInitiated],
            2,
        );
        let TriggerDecision::Proceed(event) = decision else {
            panic!("expected proceed");
        };
        assert!(event.perform_chart_push);
        assert!(event.deploy_app_on_cluster);
        assert_eq!(event.triggered_by, 2);
    }

    #[test]
    fn test_helm_deploy_never_pushes_chart() {
        let decision = TriggerEvent::build(DeploymentAppType::Helm, &[], 1);
        let TriggerDecision::Proceed(event) = decision else {
            panic!("expected proceed");
        };
        assert!(!event.perform_chart_push);
        assert!(event.deploy_app_on_cluster);
    }

    #[test]
    fn test_reentry_after_commit_skips_chart_push_only() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Argocd,
            &[
                TimelineStatus::DeploymentInitiated,
                TimelineStatus::DeploymentRequestValidated,
                TimelineStatus::GitCommit,
            ],
            1,
        );
        let TriggerDecision::Proceed(event) = decision else {
            panic!("expected proceed");
        };
        assert!(!event.perform_chart_push);
        assert!(event.deploy_app_on_cluster);
    }

    #[test]
    fn test_sync_initiated_implies_chart_committed() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Argocd,
            &[
                TimelineStatus::DeploymentInitiated,
                TimelineStatus::ArgocdSyncInitiated,
            ],
            1,
        );
        let TriggerDecision::Proceed(event) = decision else {
            panic!("expected proceed");
        };
        assert!(!event.perform_chart_push);
        assert!(event.deploy_app_on_cluster);
    }

    #[test]
    fn test_completed_sync_suppresses_backend_deploy() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Argocd,
            &[
                TimelineStatus::GitCommit,
                TimelineStatus::ArgocdSyncInitiated,
                TimelineStatus::ArgocdSyncCompleted,
            ],
            1,
        );
        let TriggerDecision::Proceed(event) = decision else {
            panic!("expected proceed");
        };
        assert!(!event.perform_chart_push);
        assert!(!event.deploy_app_on_cluster);
    }

    #[test]
    fn test_reentry_after_trigger_is_noop() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Argocd,
            &[
                TimelineStatus::GitCommit,
                TimelineStatus::DeploymentTriggered,
            ],
            1,
        );
        assert!(matches!(decision, TriggerDecision::Skip { .. }));
    }

    #[test]
    fn test_superseded_wins_over_everything() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Argocd,
            &[
                TimelineStatus::GitCommit,
                TimelineStatus::DeploymentTriggered,
                TimelineStatus::DeploymentSuperseded,
            ],
            1,
        );
        assert_eq!(decision, TriggerDecision::Superseded);
    }

    #[test]
    fn test_manifest_download_skips_cluster_deploy() {
        let decision = TriggerEvent::build(DeploymentAppType::ManifestDownload, &[], 1);
        let TriggerDecision::Proceed(event) = decision else {
            panic!("expected proceed");
        };
        assert!(!event.deploy_app_on_cluster);
        assert!(!event.perform_chart_push);
    }

    #[test]
    fn test_terminal_vulnerability_tag_skips() {
        let decision = TriggerEvent::build(
            DeploymentAppType::Helm,
            &[TimelineStatus::FoundVulnerability],
            1,
        );
        assert!(matches!(decision, TriggerDecision::Skip { .. }));
    }
}
