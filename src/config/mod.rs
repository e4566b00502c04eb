//! Frozen configuration record for the CD trigger core.
//!
//! All environment parsing happens once in [`loader`]; components receive an
//! `Arc<DeployCoreConfig>` at construction and never read the environment at
//! call sites.

pub mod loader;

use serde::{Deserialize, Serialize};

use crate::state_machine::ExecutorKind;

fn default_namespace() -> String {
    "devtron-cd".to_string()
}

fn default_timeout() -> u64 {
    3600
}

fn default_build_logs_bucket() -> String {
    "devtron-ci-log".to_string()
}

fn default_log_key_prefix() -> String {
    "devtron/cd-logs".to_string()
}

fn default_artifact_key_prefix() -> String {
    "devtron/cd-artifacts".to_string()
}

fn default_blob_storage_provider() -> String {
    "S3".to_string()
}

fn default_executor_type() -> String {
    "AWF".to_string()
}

fn default_stage_image() -> String {
    "quay.io/devtron/ci-runner:latest".to_string()
}

fn default_service_account() -> String {
    "cd-runner".to_string()
}

fn default_termination_grace_period() -> i64 {
    180
}

fn default_build_log_ttl() -> i64 {
    3600
}

fn default_max_retry() -> u32 {
    3
}

/// Root configuration, sourced from the process environment.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeployCoreConfig {
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    /// Stage workload deadline in seconds.
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,

    #[serde(default = "default_build_logs_bucket")]
    pub default_build_logs_bucket: String,

    #[serde(default = "default_log_key_prefix")]
    pub default_build_logs_key_prefix: String,

    #[serde(default = "default_artifact_key_prefix")]
    pub default_artifact_key_prefix: String,

    /// One of S3, GCS, AZURE, MINIO.
    #[serde(default = "default_blob_storage_provider")]
    pub blob_storage_provider: String,

    #[serde(default)]
    pub blob_storage_enabled: bool,

    #[serde(default)]
    pub use_blob_storage_config_in_cd_workflow: bool,

    #[serde(default)]
    pub wf_controller_instance_id: String,

    /// AWF or SYSTEM.
    #[serde(default = "default_executor_type")]
    pub cd_workflow_executor_type: String,

    /// Runner image for pre/post stage workloads.
    #[serde(default = "default_stage_image")]
    pub cd_workflow_default_image: String,

    #[serde(default = "default_service_account")]
    pub cd_workflow_service_account: String,

    #[serde(default)]
    pub enable_async_helm_install_devtron_chart: bool,

    #[serde(default)]
    pub enable_async_argocd_install_devtron_chart: bool,

    #[serde(default = "default_termination_grace_period")]
    pub termination_grace_period_secs: i64,

    #[serde(default = "default_build_log_ttl")]
    pub build_log_ttl_value_in_secs: i64,

    #[serde(default)]
    pub cd_node_label_selector: Vec<String>,

    #[serde(default)]
    pub external_cd_node_label_selector: Vec<String>,

    /// PVC name applied to every pipeline's build cache.
    #[serde(default)]
    pub ci_node_pvc_all_env: String,

    /// Per-pipeline PVC name prefix; `{prefix}-{pipeline}` wins over the
    /// all-env PVC when both are set.
    #[serde(default)]
    pub ci_node_pvc_pipeline_prefix: String,

    #[serde(default)]
    pub argocd: ArgoCdConfig,

    #[serde(default)]
    pub nats: NatsConfig,

    #[serde(default)]
    pub blob_storage: BlobStorageConfig,

    #[serde(default)]
    pub gitops: GitOpsConfig,

    #[serde(default)]
    pub helm: HelmConfig,

    #[serde(default = "default_max_retry")]
    pub blob_storage_max_retries: u32,
}

impl DeployCoreConfig {
    pub fn executor_kind(&self) -> ExecutorKind {
        self.cd_workflow_executor_type
            .parse()
            .unwrap_or(ExecutorKind::Awf)
    }

    /// Async install enablement per backend, gated off by force-sync.
    pub fn async_helm_enabled(&self, force_sync: bool) -> bool {
        self.enable_async_helm_install_devtron_chart && !force_sync
    }

    pub fn async_argocd_enabled(&self, force_sync: bool) -> bool {
        self.enable_async_argocd_install_devtron_chart && !force_sync
    }

    /// PVC name for a pipeline's build cache, if caching is configured.
    pub fn build_cache_pvc(&self, pipeline_name: &str) -> Option<String> {
        if !self.ci_node_pvc_pipeline_prefix.is_empty() {
            return Some(format!("{}-{}", self.ci_node_pvc_pipeline_prefix, pipeline_name));
        }
        if !self.ci_node_pvc_all_env.is_empty() {
            return Some(self.ci_node_pvc_all_env.clone());
        }
        None
    }
}

/// ArgoCD server access and sync behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArgoCdConfig {
    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub auth_token: String,

    /// When false, the core records `argocd-sync-completed` itself after a
    /// manual sync instead of waiting for auto-sync.
    #[serde(default)]
    pub auto_sync_enabled: bool,

    #[serde(default = "default_max_retry")]
    pub repo_register_max_retries: u32,
}

impl Default for ArgoCdConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            auth_token: String::new(),
            auto_sync_enabled: false,
            repo_register_max_retries: default_max_retry(),
        }
    }
}

impl ArgoCdConfig {
    pub fn is_manual_sync_enabled(&self) -> bool {
        !self.auto_sync_enabled
    }
}

/// NATS connection for CD success events and async dispatch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NatsConfig {
    #[serde(default = "NatsConfig::default_url")]
    pub url: String,

    #[serde(default = "NatsConfig::default_stream")]
    pub deployment_request_stream: String,
}

impl NatsConfig {
    fn default_url() -> String {
        "nats://localhost:4222".to_string()
    }

    fn default_stream() -> String {
        "DEVTRON-CD".to_string()
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            deployment_request_stream: Self::default_stream(),
        }
    }
}

/// Credentials and endpoints for the configured blob provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BlobStorageConfig {
    #[serde(default)]
    pub region: String,
    /// Custom endpoint, used by MINIO and S3-compatible stores.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub azure_account_name: String,
    #[serde(default)]
    pub azure_account_key: String,
}

/// Git provider access for GitOps repositories.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GitOpsConfig {
    #[serde(default)]
    pub provider_url: String,

    #[serde(default)]
    pub organization: String,

    #[serde(default)]
    pub token: String,

    /// Scratch directory for repository clones.
    #[serde(default = "GitOpsConfig::default_workdir")]
    pub workdir: String,
}

impl GitOpsConfig {
    fn default_workdir() -> String {
        "/tmp/gitops-workdir".to_string()
    }
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            provider_url: String::new(),
            organization: String::new(),
            token: String::new(),
            workdir: Self::default_workdir(),
        }
    }
}

/// Helm controller gRPC endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelmConfig {
    #[serde(default = "HelmConfig::default_controller_url")]
    pub controller_url: String,
}

impl HelmConfig {
    fn default_controller_url() -> String {
        "http://kubelink-service:50051".to_string()
    }
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            controller_url: Self::default_controller_url(),
        }
    }
}

impl Default for DeployCoreConfig {
    fn default() -> Self {
        // serde defaults double as the programmatic defaults
        serde_json::from_value(serde_json::json!({})).expect("default config must deserialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeployCoreConfig::default();
        assert_eq!(config.default_namespace, "devtron-cd");
        assert_eq!(config.executor_kind(), ExecutorKind::Awf);
        assert!(!config.blob_storage_enabled);
        assert!(config.argocd.is_manual_sync_enabled());
    }

    #[test]
    fn test_async_modes_respect_force_sync() {
        let mut config = DeployCoreConfig::default();
        config.enable_async_helm_install_devtron_chart = true;
        assert!(config.async_helm_enabled(false));
        assert!(!config.async_helm_enabled(true));
        assert!(!config.async_argocd_enabled(false));
    }

    #[test]
    fn test_build_cache_pvc_precedence() {
        let mut config = DeployCoreConfig::default();
        assert_eq!(config.build_cache_pvc("p1"), None);
        config.ci_node_pvc_all_env = "cache-pvc".to_string();
        assert_eq!(config.build_cache_pvc("p1"), Some("cache-pvc".to_string()));
        config.ci_node_pvc_pipeline_prefix = "cache".to_string();
        assert_eq!(config.build_cache_pvc("p1"), Some("cache-p1".to_string()));
    }
}
