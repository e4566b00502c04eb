//! Manifest publication edge cases: linked releases never auto-provision,
//! and registration retries give up after the configured attempts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use deploy_core::constants::sentinels;
use deploy_core::gitops::{
    CommitAuthor, CommitDetail, GitClient, GitOpsError, GitOpsManifestPushService,
    ManifestPushService, ManifestPushTemplate, RepoRegistrar,
};
use deploy_core::models::{TimelineSink, TimelineStatus};
use deploy_core::resilience::Backoff;

struct StubGit;

#[async_trait]
impl GitClient for StubGit {
    async fn ensure_repository(
        &self,
        repo_name: &str,
        _description: &str,
    ) -> Result<String, GitOpsError> {
        Ok(format!("https://git.example.com/acme/{repo_name}.git"))
    }

    async fn push_chart(
        &self,
        _repo_url: &str,
        _chart_path: &str,
        _chart_name: &str,
        _chart_version: &str,
        _author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError> {
        Ok(CommitDetail {
            hash: "chartsha".to_string(),
            committed_at: chrono::Utc::now().naive_utc(),
        })
    }

    async fn commit_values(
        &self,
        _repo_url: &str,
        _values_file_name: &str,
        _values_yaml: &str,
        _message: &str,
        _author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError> {
        Ok(CommitDetail {
            hash: "valuessha".to_string(),
            committed_at: chrono::Utc::now().naive_utc(),
        })
    }
}

struct AlwaysFailingRegistrar {
    attempts: Mutex<u32>,
}

#[async_trait]
impl RepoRegistrar for AlwaysFailingRegistrar {
    async fn register_repository(&self, _repo_url: &str) -> Result<(), GitOpsError> {
        *self.attempts.lock() += 1;
        Err(GitOpsError::Registration("not replicated yet".to_string()))
    }
}

#[derive(Default)]
struct RecordingSink {
    recorded: Mutex<Vec<TimelineStatus>>,
}

#[async_trait]
impl TimelineSink for RecordingSink {
    async fn record(&self, _runner_id: i64, status: TimelineStatus, _detail: &str, _by: i32) {
        self.recorded.lock().push(status);
    }
}

fn template(repo_url: &str, linked_release: bool) -> ManifestPushTemplate {
    ManifestPushTemplate {
        runner_id: 9,
        app_id: 10,
        app_name: "orders".to_string(),
        environment_id: 4,
        pipeline_override_id: 55,
        repo_url: repo_url.to_string(),
        linked_release,
        chart_name: "app-chart".to_string(),
        chart_version: "4.18.1".to_string(),
        chart_path: "/tmp/chart".to_string(),
        merged_values_yaml: "replicaCount: 2\n".to_string(),
        triggered_by: 2,
        author_name: "jo".to_string(),
        author_email: "jo@example.com".to_string(),
        manual_argo_sync: false,
    }
}

fn tight_backoff() -> Backoff {
    Backoff {
        base: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        max_attempts: 3,
    }
}

#[tokio::test]
async fn linked_release_with_sentinel_repo_is_an_error_not_a_provision() {
    let registrar = Arc::new(AlwaysFailingRegistrar {
        attempts: Mutex::new(0),
    });
    let sink = Arc::new(RecordingSink::default());
    let service = GitOpsManifestPushService::new(
        Arc::new(StubGit),
        registrar.clone(),
        sink.clone(),
        tight_backoff(),
    );

    let err = service
        .push_chart(&template(sentinels::GITOPS_REPO_NOT_CONFIGURED, true))
        .await
        .unwrap_err();

    assert!(matches!(err, GitOpsError::Provider(_)));
    // never tried to register anything
    assert_eq!(*registrar.attempts.lock(), 0);
    assert_eq!(
        sink.recorded.lock().as_slice(),
        &[TimelineStatus::GitCommitFailed]
    );
}

#[tokio::test]
async fn registration_gives_up_after_configured_attempts() {
    let registrar = Arc::new(AlwaysFailingRegistrar {
        attempts: Mutex::new(0),
    });
    let sink = Arc::new(RecordingSink::default());
    let service = GitOpsManifestPushService::new(
        Arc::new(StubGit),
        registrar.clone(),
        sink.clone(),
        tight_backoff(),
    );

    let err = service
        .push_chart(&template(sentinels::GITOPS_REPO_NOT_CONFIGURED, false))
        .await
        .unwrap_err();

    assert!(matches!(err, GitOpsError::Registration(_)));
    assert_eq!(*registrar.attempts.lock(), 3);
    assert_eq!(
        sink.recorded.lock().as_slice(),
        &[TimelineStatus::GitCommitFailed]
    );
}

#[tokio::test]
async fn empty_repo_url_is_treated_like_the_sentinel() {
    let sink = Arc::new(RecordingSink::default());
    let service = GitOpsManifestPushService::new(
        Arc::new(StubGit),
        Arc::new(AlwaysFailingRegistrar {
            attempts: Mutex::new(0),
        }),
        sink,
        tight_backoff(),
    );

    let err = service.push_chart(&template("", true)).await.unwrap_err();
    assert!(matches!(err, GitOpsError::Provider(_)));
}
