//! Deployment backends (argocd, helm, flux, manifest download) behind one
//! strategy trait, selected per pipeline.

pub mod argocd;
pub mod flux;
pub mod helm;

pub use argocd::{ArgoCdBackend, ArgoCdClient, ArgoRepoRegistrar, HttpArgoCdClient};
pub use flux::FluxBackend;
pub use helm::{GrpcHelmClient, HelmBackend, HelmClient};

use serde::{Deserialize, Serialize};

use crate::models::ClusterGrpcConfig;
use crate::state_machine::DeploymentAppType;

/// Everything a backend needs to converge one release, resolved by the
/// trigger from pipeline, environment, and deployment config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDeployRequest {
    pub pipeline_id: i32,
    pub app_id: i32,
    pub app_name: String,
    pub environment_id: i32,
    pub environment_name: String,
    pub namespace: String,
    pub runner_id: i64,
    pub release_name: String,
    pub cluster: ClusterGrpcConfig,
    pub repo_url: String,
    pub chart_name: String,
    pub chart_version: String,
    pub target_revision: String,
    pub merged_values_yaml: String,
    /// Packaged chart bytes for custom-chart installs.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub chart_content: Option<Vec<u8>>,
    pub deployment_app_created: bool,
    /// Helm release history retention, derived from the release source kind.
    pub history_max: i32,
    pub triggered_by: i32,
}

impl BackendDeployRequest {
    /// Chart location inside the gitops repository.
    pub fn chart_location(&self) -> String {
        format!("{}/{}", self.chart_name, self.chart_version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDeployOutcome {
    /// True when the backend application now exists; persisted on the
    /// pipeline so later triggers take the upgrade path.
    pub app_created: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    /// The backend was never reached. App creation is NOT persisted so a
    /// re-trigger can retry the install path cleanly.
    #[error("backend unreachable: {0}")]
    Connection(String),
    /// The backend attempted the operation and reported failure; the app may
    /// exist partially, so creation IS persisted.
    #[error("deployment failed: {0}")]
    Failed(String),
    /// Cancelled mid-flight by a newer trigger.
    #[error("deployment cancelled")]
    Cancelled,
}

impl DeploymentError {
    /// Whether the pipeline's deployment-app-created flag should still be
    /// persisted despite this error.
    pub fn persist_app_created(&self) -> bool {
        matches!(self, DeploymentError::Failed(_))
    }
}

#[async_trait::async_trait]
pub trait DeploymentBackend: Send + Sync {
    fn kind(&self) -> DeploymentAppType;

    async fn deploy(
        &self,
        request: &BackendDeployRequest,
    ) -> Result<BackendDeployOutcome, DeploymentError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn request(app_created: bool) -> BackendDeployRequest {
        BackendDeployRequest {
            pipeline_id: 3,
            app_id: 10,
            app_name: "orders".to_string(),
            environment_id: 4,
            environment_name: "staging".to_string(),
            namespace: "orders-staging".to_string(),
            runner_id: 9,
            release_name: "orders-staging".to_string(),
            cluster: ClusterGrpcConfig {
                cluster_name: "default_cluster".to_string(),
                api_server_url: "https://kubernetes.default.svc".to_string(),
                token: "token".to_string(),
                insecure_skip_tls_verify: false,
                key_data: None,
                cert_data: None,
                ca_data: None,
            },
            repo_url: "https://git.example.com/acme/orders-gitops.git".to_string(),
            chart_name: "app-chart".to_string(),
            chart_version: "4.18.1".to_string(),
            target_revision: "master".to_string(),
            merged_values_yaml: "replicaCount: 2\n".to_string(),
            chart_content: None,
            deployment_app_created: app_created,
            history_max: 3,
            triggered_by: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_created_persists_only_for_backend_failures() {
        assert!(DeploymentError::Failed("install error".to_string()).persist_app_created());
        assert!(!DeploymentError::Connection("dial timeout".to_string()).persist_app_created());
        assert!(!DeploymentError::Cancelled.persist_app_created());
    }

    #[test]
    fn test_chart_location_joins_name_and_version() {
        assert_eq!(test_support::request(false).chart_location(), "app-chart/4.18.1");
    }
}
