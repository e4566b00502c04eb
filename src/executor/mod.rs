//! Workflow executors: submit pre/post stage workloads to a cluster and
//! manage their lifecycle. The only modules that touch cluster API types
//! directly are this one and the flux backend.

mod argo;
mod job;

pub use argo::ArgoWorkflowExecutor;
pub use job::SystemJobExecutor;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::state_machine::{ExecutorKind, StageKind};

/// Connection material for the target cluster, built lazily per request
/// from the environment's cluster row. An empty host means the local
/// (in-cluster) API server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterRestConfig {
    pub host: String,
    pub bearer_token: Option<String>,
    pub insecure_skip_tls_verify: bool,
    /// Base64-encoded PEM bundle.
    pub ca_data: Option<String>,
}

impl ClusterRestConfig {
    pub fn in_cluster() -> Self {
        Self::default()
    }

    pub fn is_in_cluster(&self) -> bool {
        self.host.is_empty()
    }

    /// Build a kube client for this cluster. External clusters get a
    /// synthesized kubeconfig from the stored bearer token and TLS material.
    pub async fn client(&self) -> Result<kube::Client, ExecutorError> {
        let config = if self.is_in_cluster() {
            kube::Config::incluster()
                .map_err(|e| ExecutorError::Cluster(format!("in-cluster config: {e}")))?
        } else {
            let mut cluster = json!({ "server": self.host });
            if self.insecure_skip_tls_verify {
                cluster["insecure-skip-tls-verify"] = json!(true);
            } else if let Some(ca) = &self.ca_data {
                cluster["certificate-authority-data"] = json!(ca);
            }
            let kubeconfig: kube::config::Kubeconfig = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Config",
                "clusters": [{ "name": "target", "cluster": cluster }],
                "users": [{ "name": "target", "user": {
                    "token": self.bearer_token.clone().unwrap_or_default()
                }}],
                "contexts": [{ "name": "target", "context": {
                    "cluster": "target", "user": "target"
                }}],
                "current-context": "target"
            }))
            .map_err(|e| ExecutorError::Cluster(format!("kubeconfig render: {e}")))?;

            kube::Config::from_custom_kubeconfig(
                kubeconfig,
                &kube::config::KubeConfigOptions::default(),
            )
            .await
            .map_err(|e| ExecutorError::Cluster(format!("kubeconfig load: {e}")))?
        };

        kube::Client::try_from(config)
            .map_err(|e| ExecutorError::Cluster(format!("client build: {e}")))
    }
}

/// ConfigMap or Secret attached to the stage workload, either as env or as
/// a file mount.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachedResource {
    pub name: String,
    pub mount_path: Option<String>,
    pub data: BTreeMap<String, String>,
}

/// Everything needed to run one pre/post stage workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub workflow_name_prefix: String,
    pub namespace: String,
    pub pipeline_name: String,
    pub cd_workflow_id: i32,
    pub runner_id: i32,
    pub stage: StageKind,
    pub image: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub service_account_name: String,
    pub active_deadline_seconds: i64,
    pub ttl_seconds_after_finished: i32,
    pub termination_grace_period_seconds: i64,
    pub node_selector: BTreeMap<String, String>,
    pub config_maps: Vec<AttachedResource>,
    pub secrets: Vec<AttachedResource>,
    /// PVC name when the app opted into build caching.
    pub build_cache_pvc: Option<String>,
    pub cluster_config: ClusterRestConfig,
}

/// Cluster references returned by a successful submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedWorkflow {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Termination target does not exist; surfaced as a user error.
    #[error("workflow {name} not found in namespace {namespace}")]
    NotFound { name: String, namespace: String },
    #[error("cluster error: {0}")]
    Cluster(String),
    #[error("render error: {0}")]
    Render(String),
}

impl ExecutorError {
    pub fn from_kube(err: kube::Error, name: &str, namespace: &str) -> Self {
        match err {
            kube::Error::Api(ref response) if response.code == 404 => ExecutorError::NotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            other => ExecutorError::Cluster(other.to_string()),
        }
    }
}

/// Existence check for the deploy namespace on the target cluster.
pub async fn namespace_exists(
    cluster: &ClusterRestConfig,
    namespace: &str,
) -> Result<bool, ExecutorError> {
    use k8s_openapi::api::core::v1::Namespace;

    let client = cluster.client().await?;
    let api: kube::Api<Namespace> = kube::Api::all(client);
    let found = api
        .get_opt(namespace)
        .await
        .map_err(|e| ExecutorError::Cluster(e.to_string()))?;
    Ok(found.is_some())
}

/// Label identifying every resource a stage run owns, keyed by workflow id.
pub(crate) const WORKFLOW_ID_LABEL: &str = "devtron.ai/workflow-id";
pub(crate) const PURPOSE_LABEL: &str = "devtron.ai/purpose";
pub(crate) const PURPOSE_WORKFLOW: &str = "workflow";

pub(crate) fn workflow_labels(cd_workflow_id: i32) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(PURPOSE_LABEL.to_string(), PURPOSE_WORKFLOW.to_string());
    labels.insert(WORKFLOW_ID_LABEL.to_string(), cd_workflow_id.to_string());
    labels
}

#[async_trait]
pub trait WorkflowExecutor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Render and apply the stage workload.
    async fn submit(&self, template: &WorkflowTemplate)
        -> Result<SubmittedWorkflow, ExecutorError>;

    /// Terminate one named workload. Missing target is [`ExecutorError::NotFound`].
    async fn terminate(
        &self,
        cluster: &ClusterRestConfig,
        name: &str,
        namespace: &str,
    ) -> Result<(), ExecutorError>;

    /// Delete every workload labelled with the workflow id. Used by
    /// force-abort after the named terminate.
    async fn terminate_dangling(
        &self,
        cluster: &ClusterRestConfig,
        cd_workflow_id: i32,
        namespace: &str,
    ) -> Result<(), ExecutorError>;

    async fn get_status(
        &self,
        cluster: &ClusterRestConfig,
        name: &str,
        namespace: &str,
    ) -> Result<WorkflowPhase, ExecutorError>;
}

/// Downward-API and cache volumes shared by both executors, as raw pod-spec
/// JSON fragments.
pub(crate) fn shared_volumes(template: &WorkflowTemplate) -> (Vec<serde_json::Value>, Vec<serde_json::Value>) {
    use crate::constants::pod_paths;

    let mut volumes = vec![json!({
        "name": "pod-meta",
        "downwardAPI": { "items": [
            { "path": "labels", "fieldRef": { "fieldPath": "metadata.labels" } },
            { "path": "annotations", "fieldRef": { "fieldPath": "metadata.annotations" } }
        ]}
    })];
    let mut mounts = vec![json!({
        "name": "pod-meta",
        "mountPath": pod_paths::DOWNWARD_API,
        "readOnly": true
    })];

    for (index, cm) in template.config_maps.iter().enumerate() {
        if let Some(path) = &cm.mount_path {
            let volume_name = format!("cm-{index}");
            volumes.push(json!({
                "name": volume_name,
                "configMap": { "name": cm.name }
            }));
            mounts.push(json!({ "name": volume_name, "mountPath": path }));
        }
    }
    for (index, secret) in template.secrets.iter().enumerate() {
        if let Some(path) = &secret.mount_path {
            let volume_name = format!("sec-{index}");
            volumes.push(json!({
                "name": volume_name,
                "secret": { "secretName": secret.name }
            }));
            mounts.push(json!({ "name": volume_name, "mountPath": path }));
        }
    }

    if let Some(pvc) = &template.build_cache_pvc {
        volumes.push(json!({
            "name": "build-cache",
            "persistentVolumeClaim": { "claimName": pvc }
        }));
        for (index, path) in [pod_paths::CACHE_ROOT, pod_paths::CACHE_BUILD, pod_paths::CACHE_OCI]
            .iter()
            .enumerate()
        {
            mounts.push(json!({
                "name": "build-cache",
                "mountPath": path,
                "subPath": format!("cache-{index}")
            }));
        }
    }

    (volumes, mounts)
}

pub(crate) fn env_json(env: &[(String, String)]) -> Vec<serde_json::Value> {
    env.iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect()
}
