//! ArgoCD backend: converge the Application object through the ArgoCD API,
//! patching source drift and syncing when auto-sync is off.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{BackendDeployOutcome, BackendDeployRequest, DeploymentBackend, DeploymentError};
use crate::constants::layout;
use crate::models::timeline::{TimelineSink, TimelineStatus};
use crate::state_machine::DeploymentAppType;

/// Minimal ArgoCD API surface the backend needs. HTTP in production,
/// recording fakes in tests.
#[async_trait]
pub trait ArgoCdClient: Send + Sync {
    async fn get_application(&self, name: &str) -> Result<Option<Value>, DeploymentError>;
    async fn create_application(&self, application: &Value) -> Result<(), DeploymentError>;
    /// Merge-patch on the application spec.
    async fn patch_application(&self, name: &str, patch: &Value) -> Result<(), DeploymentError>;
    async fn sync_application(&self, name: &str, revision: &str) -> Result<(), DeploymentError>;
    async fn register_repository(&self, repo_url: &str) -> Result<(), DeploymentError>;
}

pub struct HttpArgoCdClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl HttpArgoCdClient {
    pub fn new(server_url: &str, auth_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: server_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    fn map_err(err: reqwest::Error) -> DeploymentError {
        if err.is_connect() || err.is_timeout() {
            DeploymentError::Connection(err.to_string())
        } else {
            DeploymentError::Failed(err.to_string())
        }
    }
}

#[async_trait]
impl ArgoCdClient for HttpArgoCdClient {
    async fn get_application(&self, name: &str) -> Result<Option<Value>, DeploymentError> {
        let url = format!("{}/api/v1/applications/{name}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(Self::map_err)?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let application = response
            .error_for_status()
            .map_err(Self::map_err)?
            .json()
            .await
            .map_err(Self::map_err)?;
        Ok(Some(application))
    }

    async fn create_application(&self, application: &Value) -> Result<(), DeploymentError> {
        let url = format!("{}/api/v1/applications", self.base_url);
        self.http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(application)
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn patch_application(&self, name: &str, patch: &Value) -> Result<(), DeploymentError> {
        let url = format!("{}/api/v1/applications/{name}", self.base_url);
        self.http
            .patch(&url)
            .bearer_auth(&self.auth_token)
            .json(&json!({
                "name": name,
                "patch": patch.to_string(),
                "patchType": "merge"
            }))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn sync_application(&self, name: &str, revision: &str) -> Result<(), DeploymentError> {
        let url = format!("{}/api/v1/applications/{name}/sync", self.base_url);
        self.http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&json!({ "revision": revision, "prune": true }))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn register_repository(&self, repo_url: &str) -> Result<(), DeploymentError> {
        let url = format!("{}/api/v1/repositories", self.base_url);
        self.http
            .post(&url)
            .bearer_auth(&self.auth_token)
            .json(&json!({ "repo": repo_url }))
            .send()
            .await
            .map_err(Self::map_err)?
            .error_for_status()
            .map_err(Self::map_err)?;
        Ok(())
    }
}

/// Adapter letting the manifest push register fresh gitops repositories
/// with ArgoCD.
pub struct ArgoRepoRegistrar {
    client: Arc<dyn ArgoCdClient>,
}

impl ArgoRepoRegistrar {
    pub fn new(client: Arc<dyn ArgoCdClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl crate::gitops::RepoRegistrar for ArgoRepoRegistrar {
    async fn register_repository(&self, repo_url: &str) -> Result<(), crate::gitops::GitOpsError> {
        self.client
            .register_repository(repo_url)
            .await
            .map_err(|e| crate::gitops::GitOpsError::Registration(e.to_string()))
    }
}

pub struct ArgoCdBackend {
    client: Arc<dyn ArgoCdClient>,
    timelines: Arc<dyn TimelineSink>,
    auto_sync_enabled: bool,
}

impl ArgoCdBackend {
    pub fn new(
        client: Arc<dyn ArgoCdClient>,
        timelines: Arc<dyn TimelineSink>,
        auto_sync_enabled: bool,
    ) -> Self {
        Self {
            client,
            timelines,
            auto_sync_enabled,
        }
    }

    fn render_application(&self, request: &BackendDeployRequest) -> Value {
        let sync_policy = if self.auto_sync_enabled {
            json!({ "automated": { "prune": true } })
        } else {
            json!({})
        };
        json!({
            "metadata": { "name": request.release_name },
            "spec": {
                "project": "default",
                "source": {
                    "repoURL": request.repo_url,
                    "path": request.chart_location(),
                    "targetRevision": request.target_revision,
                    "helm": {
                        "valueFiles": [format!("../../{}", layout::env_values_file(request.environment_id))]
                    }
                },
                "destination": {
                    "server": request.cluster.api_server_url,
                    "namespace": request.namespace
                },
                "syncPolicy": sync_policy
            }
        })
    }

    /// Patch spec.source when the stored application drifted from the
    /// deployment config (repo moved, chart relocated, revision changed).
    fn source_drift(&self, existing: &Value, request: &BackendDeployRequest) -> Option<Value> {
        let source = &existing["spec"]["source"];
        let drifted = source["repoURL"].as_str() != Some(request.repo_url.as_str())
            || source["path"].as_str() != Some(request.chart_location().as_str())
            || source["targetRevision"].as_str() != Some(request.target_revision.as_str());
        drifted.then(|| {
            json!({
                "spec": {
                    "source": {
                        "repoURL": request.repo_url,
                        "path": request.chart_location(),
                        "targetRevision": request.target_revision
                    }
                }
            })
        })
    }
}

#[async_trait]
impl DeploymentBackend for ArgoCdBackend {
    fn kind(&self) -> DeploymentAppType {
        DeploymentAppType::Argocd
    }

    async fn deploy(
        &self,
        request: &BackendDeployRequest,
    ) -> Result<BackendDeployOutcome, DeploymentError> {
        match self.client.get_application(&request.release_name).await? {
            Some(existing) => {
                if let Some(patch) = self.source_drift(&existing, request) {
                    debug!(app = %request.release_name, "patching argocd application source drift");
                    self.client
                        .patch_application(&request.release_name, &patch)
                        .await?;
                }
            }
            None => {
                info!(app = %request.release_name, "creating argocd application");
                self.client
                    .create_application(&self.render_application(request))
                    .await?;
            }
        }

        if !self.auto_sync_enabled {
            self.client
                .sync_application(&request.release_name, &request.target_revision)
                .await?;
            self.timelines
                .record(
                    request.runner_id,
                    TimelineStatus::ArgocdSyncCompleted,
                    "argocd sync completed",
                    request.triggered_by,
                )
                .await;
        }

        Ok(BackendDeployOutcome { app_created: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::test_support::request;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeArgo {
        existing: Option<Value>,
        created: Mutex<Vec<Value>>,
        patched: Mutex<Vec<Value>>,
        synced: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArgoCdClient for FakeArgo {
        async fn get_application(&self, _name: &str) -> Result<Option<Value>, DeploymentError> {
            Ok(self.existing.clone())
        }
        async fn create_application(&self, application: &Value) -> Result<(), DeploymentError> {
            self.created.lock().push(application.clone());
            Ok(())
        }
        async fn patch_application(
            &self,
            _name: &str,
            patch: &Value,
        ) -> Result<(), DeploymentError> {
            self.patched.lock().push(patch.clone());
            Ok(())
        }
        async fn sync_application(
            &self,
            name: &str,
            _revision: &str,
        ) -> Result<(), DeploymentError> {
            self.synced.lock().push(name.to_string());
            Ok(())
        }
        async fn register_repository(&self, _repo_url: &str) -> Result<(), DeploymentError> {
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

    #[tokio::test]
    async fn test_missing_application_is_created_and_synced() {
        let argo = Arc::new(FakeArgo::default());
        let sink = Arc::new(RecordingSink::default());
        let backend = ArgoCdBackend::new(argo.clone(), sink.clone(), false);

        let outcome = backend.deploy(&request(false)).await.unwrap();

        assert!(outcome.app_created);
        assert_eq!(argo.created.lock().len(), 1);
        assert_eq!(argo.synced.lock().as_slice(), &["orders-staging".to_string()]);
        assert_eq!(
            sink.recorded.lock().as_slice(),
            &[TimelineStatus::ArgocdSyncCompleted]
        );
    }

    #[tokio::test]
    async fn test_drifted_source_is_patched_not_recreated() {
        let argo = Arc::new(FakeArgo {
            existing: Some(json!({
                "spec": { "source": {
                    "repoURL": "https://git.example.com/acme/old.git",
                    "path": "app-chart/4.18.1",
                    "targetRevision": "master"
                }}
            })),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let backend = ArgoCdBackend::new(argo.clone(), sink, true);

        backend.deploy(&request(true)).await.unwrap();

        assert!(argo.created.lock().is_empty());
        let patched = argo.patched.lock();
        assert_eq!(patched.len(), 1);
        assert_eq!(
            patched[0]["spec"]["source"]["repoURL"],
            "https://git.example.com/acme/orders-gitops.git"
        );
        assert!(argo.synced.lock().is_empty());
    }

    #[tokio::test]
    async fn test_matching_source_with_auto_sync_touches_nothing() {
        let argo = Arc::new(FakeArgo {
            existing: Some(json!({
                "spec": { "source": {
                    "repoURL": "https://git.example.com/acme/orders-gitops.git",
                    "path": "app-chart/4.18.1",
                    "targetRevision": "master"
                }}
            })),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let backend = ArgoCdBackend::new(argo.clone(), sink.clone(), true);

        backend.deploy(&request(true)).await.unwrap();

        assert!(argo.created.lock().is_empty());
        assert!(argo.patched.lock().is_empty());
        assert!(argo.synced.lock().is_empty());
        assert!(sink.recorded.lock().is_empty());
    }
}
