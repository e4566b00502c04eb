//! Deploy-path decision flow over the public API: which steps a fresh or
//! re-entered trigger performs, and how blocked triggers surface.

use deploy_core::models::TimelineStatus;
use deploy_core::state_machine::DeploymentAppType;
use deploy_core::trigger::{BlockReason, TriggerDecision, TriggerError, TriggerEvent};

#[test]
fn fresh_argocd_trigger_performs_both_steps() {
    let decision = TriggerEvent::build(
        DeploymentAppType::Argocd,
        &[
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::DeploymentRequestValidated,
        ],
        2,
    );
    let TriggerDecision::Proceed(event) = decision else {
        panic!("expected proceed, got {decision:?}");
    };
    assert!(event.perform_chart_push);
    assert!(event.deploy_app_on_cluster);
}

#[test]
fn reentry_walks_the_timeline_forward() {
    // First re-entry: the git commit landed but the deploy never ran. Only
    // the cluster deploy remains.
    let decision = TriggerEvent::build(
        DeploymentAppType::Argocd,
        &[
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::DeploymentRequestValidated,
            TimelineStatus::GitCommit,
        ],
        2,
    );
    let TriggerDecision::Proceed(event) = decision else {
        panic!("expected proceed, got {decision:?}");
    };
    assert!(!event.perform_chart_push);
    assert!(event.deploy_app_on_cluster);

    // Second re-entry: everything already happened. Nothing to do.
    let decision = TriggerEvent::build(
        DeploymentAppType::Argocd,
        &[
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::DeploymentRequestValidated,
            TimelineStatus::GitCommit,
            TimelineStatus::DeploymentTriggered,
        ],
        2,
    );
    assert!(matches!(decision, TriggerDecision::Skip { .. }));
}

#[test]
fn reentry_after_sync_initiated_skips_the_chart_push() {
    // A crash between the manual sync call and its completion tag leaves
    // ARGOCD_SYNC_INITIATED as the last mark. The commit already landed, so
    // only the backend deploy remains.
    let decision = TriggerEvent::build(
        DeploymentAppType::Argocd,
        &[
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::DeploymentRequestValidated,
            TimelineStatus::ArgocdSyncInitiated,
        ],
        2,
    );
    let TriggerDecision::Proceed(event) = decision else {
        panic!("expected proceed, got {decision:?}");
    };
    assert!(!event.perform_chart_push);
    assert!(event.deploy_app_on_cluster);
}

#[test]
fn reentry_after_sync_completed_skips_the_backend_deploy() {
    // The manual sync finished but the triggered tag never landed. The
    // re-entry must not sync the application a second time.
    let decision = TriggerEvent::build(
        DeploymentAppType::Argocd,
        &[
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::GitCommit,
            TimelineStatus::ArgocdSyncInitiated,
            TimelineStatus::ArgocdSyncCompleted,
        ],
        2,
    );
    let TriggerDecision::Proceed(event) = decision else {
        panic!("expected proceed, got {decision:?}");
    };
    assert!(!event.perform_chart_push);
    assert!(!event.deploy_app_on_cluster);
}

#[test]
fn informational_tags_do_not_change_the_decision() {
    // Kubectl-apply noise is excluded by the timeline reader; even when it
    // leaks through, the decision only keys on the step tags.
    let decision = TriggerEvent::build(
        DeploymentAppType::Flux,
        &[
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::KubectlApplyStarted,
        ],
        1,
    );
    let TriggerDecision::Proceed(event) = decision else {
        panic!("expected proceed, got {decision:?}");
    };
    assert!(event.perform_chart_push);
}

#[test]
fn superseded_runner_stays_superseded() {
    for extra in [
        TimelineStatus::GitCommit,
        TimelineStatus::DeploymentTriggered,
        TimelineStatus::DeploymentFailed,
    ] {
        let decision = TriggerEvent::build(
            DeploymentAppType::Helm,
            &[TimelineStatus::DeploymentSuperseded, extra],
            1,
        );
        assert_eq!(decision, TriggerDecision::Superseded, "with extra {extra}");
    }
}

#[test]
fn terminal_gate_tags_skip_instead_of_retrying() {
    for tag in [
        TimelineStatus::FoundVulnerability,
        TimelineStatus::GitopsRepoNotConfigured,
        TimelineStatus::DeploymentFailed,
    ] {
        let decision = TriggerEvent::build(DeploymentAppType::Argocd, &[tag], 1);
        assert!(
            matches!(decision, TriggerDecision::Skip { .. }),
            "tag {tag} should skip"
        );
    }
}

#[test]
fn block_reasons_map_to_typed_errors_and_timeline_tags() {
    let block = BlockReason::Vulnerability {
        digest: "sha256:deadbeef".to_string(),
    };
    assert_eq!(block.timeline_status(), TimelineStatus::FoundVulnerability);
    assert_eq!(
        block.to_string(),
        "found vulnerability for image digest sha256:deadbeef"
    );
    let err: TriggerError = block.into();
    assert_eq!(err.http_status(), 403);
    assert!(!err.is_retryable());

    let block = BlockReason::GitOpsNotConfigured {
        app_name: "orders".to_string(),
    };
    assert_eq!(
        block.timeline_status(),
        TimelineStatus::GitopsRepoNotConfigured
    );
    let err: TriggerError = block.into();
    assert_eq!(err.http_status(), 409);
}

#[test]
fn backend_failures_split_into_retryable_and_permanent() {
    use deploy_core::deployment::DeploymentError;

    let err: TriggerError = DeploymentError::Connection("dial tcp: timeout".to_string()).into();
    assert!(err.is_retryable());

    let err: TriggerError = DeploymentError::Failed("install failed".to_string()).into();
    assert!(!err.is_retryable());

    let err: TriggerError = DeploymentError::Cancelled.into();
    assert!(matches!(err, TriggerError::Superseded));
}
