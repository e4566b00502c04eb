//! Manifest push orchestration: repository provisioning, chart and values
//! commits, and the timelines that narrate them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{
    CommitAuthor, GitClient, GitOpsError, ManifestPushTemplate, PushResult, RepoRegistrar,
};
use crate::constants::{layout, sentinels};
use crate::models::timeline::{TimelineSink, TimelineStatus};
use crate::resilience::Backoff;

#[async_trait]
pub trait ManifestPushService: Send + Sync {
    async fn push_chart(
        &self,
        template: &ManifestPushTemplate,
    ) -> Result<PushResult, GitOpsError>;
}

pub struct GitOpsManifestPushService {
    git: Arc<dyn GitClient>,
    registrar: Arc<dyn RepoRegistrar>,
    timelines: Arc<dyn TimelineSink>,
    registration_backoff: Backoff,
}

impl GitOpsManifestPushService {
    pub fn new(
        git: Arc<dyn GitClient>,
        registrar: Arc<dyn RepoRegistrar>,
        timelines: Arc<dyn TimelineSink>,
        registration_backoff: Backoff,
    ) -> Self {
        Self {
            git,
            registrar,
            timelines,
            registration_backoff,
        }
    }

    /// Resolve the repository, creating and registering it when the config
    /// still carries the sentinel. Linked releases never auto-provision.
    async fn resolve_repo(
        &self,
        template: &ManifestPushTemplate,
    ) -> Result<(String, Option<String>), GitOpsError> {
        let configured = template.repo_url != sentinels::GITOPS_REPO_NOT_CONFIGURED
            && !template.repo_url.is_empty();
        if configured {
            return Ok((template.repo_url.clone(), None));
        }
        if template.linked_release {
            return Err(GitOpsError::Provider(
                "linked release has no gitops repository".to_string(),
            ));
        }

        let repo_name = layout::gitops_repo_name(&template.app_name);
        let repo_url = self
            .git
            .ensure_repository(&repo_name, &format!("gitops state for {}", template.app_name))
            .await?;
        self.registration_backoff
            .retry(|| self.registrar.register_repository(&repo_url))
            .await?;
        info!(repo = %repo_url, app = %template.app_name, "provisioned gitops repository");
        Ok((repo_url.clone(), Some(repo_url)))
    }

    async fn push(&self, template: &ManifestPushTemplate) -> Result<PushResult, GitOpsError> {
        let (repo_url, new_repo_url) = self.resolve_repo(template).await?;
        let author = CommitAuthor {
            name: template.author_name.clone(),
            email: template.author_email.clone(),
        };

        self.git
            .push_chart(
                &repo_url,
                &template.chart_path,
                &template.chart_name,
                &template.chart_version,
                &author,
            )
            .await?;

        let message = format!(
            "Updated values for override {} env {}",
            template.pipeline_override_id, template.environment_id
        );
        let commit = self
            .git
            .commit_values(
                &repo_url,
                &layout::env_values_file(template.environment_id),
                &template.merged_values_yaml,
                &message,
                &author,
            )
            .await?;

        Ok(PushResult {
            commit_hash: commit.hash,
            commit_time: commit.committed_at,
            new_repo_url,
        })
    }
}

#[async_trait]
impl ManifestPushService for GitOpsManifestPushService {
    async fn push_chart(
        &self,
        template: &ManifestPushTemplate,
    ) -> Result<PushResult, GitOpsError> {
        match self.push(template).await {
            Ok(result) => {
                self.timelines
                    .record(
                        template.runner_id,
                        TimelineStatus::GitCommit,
                        &format!("manifest committed: {}", result.commit_hash),
                        template.triggered_by,
                    )
                    .await;
                if template.manual_argo_sync {
                    self.timelines
                        .record(
                            template.runner_id,
                            TimelineStatus::ArgocdSyncInitiated,
                            "argocd sync initiated",
                            template.triggered_by,
                        )
                        .await;
                }
                Ok(result)
            }
            Err(err) => {
                warn!(runner_id = template.runner_id, error = %err, "manifest push failed");
                self.timelines
                    .record(
                        template.runner_id,
                        TimelineStatus::GitCommitFailed,
                        &format!("manifest push failed: {err}"),
                        template.triggered_by,
                    )
                    .await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitops::CommitDetail;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct FakeGit {
        repo_created: Mutex<Option<String>>,
        fail_values_commit: bool,
    }

    #[async_trait]
    impl GitClient for FakeGit {
        async fn ensure_repository(
            &self,
            repo_name: &str,
            _description: &str,
        ) -> Result<String, GitOpsError> {
            let url = format!("https://git.example.com/acme/{repo_name}.git");
            *self.repo_created.lock() = Some(url.clone());
            Ok(url)
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
            if self.fail_values_commit {
                return Err(GitOpsError::Commit("push rejected".to_string()));
            }
            Ok(CommitDetail {
                hash: "valuessha".to_string(),
                committed_at: chrono::Utc::now().naive_utc(),
            })
        }
    }

    struct FakeRegistrar {
        failures_before_success: Mutex<u32>,
    }

    #[async_trait]
    impl RepoRegistrar for FakeRegistrar {
        async fn register_repository(&self, _repo_url: &str) -> Result<(), GitOpsError> {
            let mut left = self.failures_before_success.lock();
            if *left > 0 {
                *left -= 1;
                return Err(GitOpsError::Registration("not replicated yet".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        recorded: Mutex<Vec<TimelineStatus>>,
    }

    #[async_trait]
    impl TimelineSink for RecordingSink {
        async fn record(
            &self,
            _runner_id: i64,
            status: TimelineStatus,
            _detail: &str,
            _created_by: i32,
        ) {
            self.recorded.lock().push(status);
        }
    }

    fn template(repo_url: &str, manual_sync: bool) -> ManifestPushTemplate {
        ManifestPushTemplate {
            runner_id: 9,
            app_id: 10,
            app_name: "orders".to_string(),
            environment_id: 4,
            pipeline_override_id: 55,
            repo_url: repo_url.to_string(),
            linked_release: false,
            chart_name: "app-chart".to_string(),
            chart_version: "4.18.1".to_string(),
            chart_path: "/tmp/chart".to_string(),
            merged_values_yaml: "replicaCount: 2\n".to_string(),
            triggered_by: 2,
            author_name: "jo".to_string(),
            author_email: "jo@example.com".to_string(),
            manual_argo_sync: manual_sync,
        }
    }

    fn service(
        git: Arc<FakeGit>,
        registrar: Arc<FakeRegistrar>,
        sink: Arc<RecordingSink>,
    ) -> GitOpsManifestPushService {
        GitOpsManifestPushService::new(
            git,
            registrar,
            sink,
            Backoff {
                base: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_sentinel_repo_is_provisioned_and_registered_with_retry() {
        let git = Arc::new(FakeGit {
            repo_created: Mutex::new(None),
            fail_values_commit: false,
        });
        let registrar = Arc::new(FakeRegistrar {
            failures_before_success: Mutex::new(2),
        });
        let sink = Arc::new(RecordingSink::default());

        let result = service(git.clone(), registrar, sink.clone())
            .push_chart(&template(sentinels::GITOPS_REPO_NOT_CONFIGURED, false))
            .await
            .unwrap();

        assert_eq!(
            result.new_repo_url.as_deref(),
            Some("https://git.example.com/acme/orders-gitops.git")
        );
        assert!(git.repo_created.lock().is_some());
        assert_eq!(sink.recorded.lock().as_slice(), &[TimelineStatus::GitCommit]);
    }

    #[tokio::test]
    async fn test_configured_repo_is_left_alone_and_sync_timeline_written() {
        let git = Arc::new(FakeGit {
            repo_created: Mutex::new(None),
            fail_values_commit: false,
        });
        let registrar = Arc::new(FakeRegistrar {
            failures_before_success: Mutex::new(0),
        });
        let sink = Arc::new(RecordingSink::default());

        let result = service(git.clone(), registrar, sink.clone())
            .push_chart(&template("https://git.example.com/acme/orders.git", true))
            .await
            .unwrap();

        assert!(result.new_repo_url.is_none());
        assert!(git.repo_created.lock().is_none());
        assert_eq!(
            sink.recorded.lock().as_slice(),
            &[
                TimelineStatus::GitCommit,
                TimelineStatus::ArgocdSyncInitiated
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_failure_writes_failed_timeline() {
        let git = Arc::new(FakeGit {
            repo_created: Mutex::new(None),
            fail_values_commit: true,
        });
        let registrar = Arc::new(FakeRegistrar {
            failures_before_success: Mutex::new(0),
        });
        let sink = Arc::new(RecordingSink::default());

        let err = service(git, registrar, sink.clone())
            .push_chart(&template("https://git.example.com/acme/orders.git", false))
            .await
            .unwrap_err();

        assert!(matches!(err, GitOpsError::Commit(_)));
        assert_eq!(
            sink.recorded.lock().as_slice(),
            &[TimelineStatus::GitCommitFailed]
        );
    }
}
