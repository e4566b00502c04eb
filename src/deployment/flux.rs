//! Flux backend: server-side applies a GitRepository source and a
//! HelmRelease to the target cluster and lets flux reconcile.

use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use serde_json::json;
use tracing::info;

use super::{BackendDeployOutcome, BackendDeployRequest, DeploymentBackend, DeploymentError};
use crate::constants::layout;
use crate::executor::ClusterRestConfig;
use crate::state_machine::DeploymentAppType;

const RECONCILE_INTERVAL: &str = "1m0s";
const FIELD_MANAGER: &str = "deploy-core";

pub struct FluxBackend {
    cluster: ClusterRestConfig,
}

impl FluxBackend {
    pub fn new(cluster: ClusterRestConfig) -> Self {
        Self { cluster }
    }

    fn git_repository_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            "source.toolkit.fluxcd.io",
            "v1",
            "GitRepository",
        ))
    }

    fn helm_release_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk(
            "helm.toolkit.fluxcd.io",
            "v2",
            "HelmRelease",
        ))
    }

    fn render_git_repository(request: &BackendDeployRequest) -> serde_json::Value {
        json!({
            "apiVersion": "source.toolkit.fluxcd.io/v1",
            "kind": "GitRepository",
            "metadata": {
                "name": request.release_name,
                "namespace": request.namespace
            },
            "spec": {
                "interval": RECONCILE_INTERVAL,
                "url": request.repo_url,
                "ref": { "branch": request.target_revision }
            }
        })
    }

    fn render_helm_release(request: &BackendDeployRequest) -> serde_json::Value {
        json!({
            "apiVersion": "helm.toolkit.fluxcd.io/v2",
            "kind": "HelmRelease",
            "metadata": {
                "name": request.release_name,
                "namespace": request.namespace
            },
            "spec": {
                "interval": RECONCILE_INTERVAL,
                "chart": {
                    "spec": {
                        "chart": request.chart_location(),
                        "sourceRef": {
                            "kind": "GitRepository",
                            "name": request.release_name
                        },
                        "valuesFiles": [layout::env_values_file(request.environment_id)]
                    }
                },
                "releaseName": request.release_name,
                "targetNamespace": request.namespace
            }
        })
    }

    async fn apply(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        object: serde_json::Value,
    ) -> Result<(), DeploymentError> {
        let client = self
            .cluster
            .client()
            .await
            .map_err(|e| DeploymentError::Connection(e.to_string()))?;
        let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, resource);
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object),
        )
        .await
        .map_err(|e| DeploymentError::Failed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DeploymentBackend for FluxBackend {
    fn kind(&self) -> DeploymentAppType {
        DeploymentAppType::Flux
    }

    async fn deploy(
        &self,
        request: &BackendDeployRequest,
    ) -> Result<BackendDeployOutcome, DeploymentError> {
        self.apply(
            &Self::git_repository_resource(),
            &request.namespace,
            &request.release_name,
            Self::render_git_repository(request),
        )
        .await?;
        self.apply(
            &Self::helm_release_resource(),
            &request.namespace,
            &request.release_name,
            Self::render_helm_release(request),
        )
        .await?;
        info!(
            release = %request.release_name,
            namespace = %request.namespace,
            "flux objects applied"
        );
        Ok(BackendDeployOutcome { app_created: true })
    }
}
