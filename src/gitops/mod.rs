//! GitOps manifest publication (chart + per-environment values) ahead of a
//! backend deploy.

mod git;
mod push;

pub use git::{CliGitClient, CommitAuthor, CommitDetail, GitClient, GitProviderApi};
pub use push::{GitOpsManifestPushService, ManifestPushService};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Everything the push needs, resolved by the trigger before calling in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPushTemplate {
    pub runner_id: i64,
    pub app_id: i32,
    pub app_name: String,
    pub environment_id: i32,
    pub pipeline_override_id: i32,
    /// Current repo url from the deployment config; may be the sentinel.
    pub repo_url: String,
    pub linked_release: bool,
    pub chart_name: String,
    pub chart_version: String,
    /// Local directory holding the packaged chart contents.
    pub chart_path: String,
    pub merged_values_yaml: String,
    pub triggered_by: i32,
    pub author_name: String,
    pub author_email: String,
    /// When true the argo app is synced manually, so the push records the
    /// sync-initiated timeline itself.
    pub manual_argo_sync: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    pub commit_hash: String,
    pub commit_time: NaiveDateTime,
    /// Set when the push had to create the repository first; the caller
    /// persists it on the deployment config with a CAS update.
    pub new_repo_url: Option<String>,
}

/// Registers a repository with the deployment backend so it may pull from
/// it. Fresh repositories need bounded retries while the provider's
/// replication catches up.
#[async_trait::async_trait]
pub trait RepoRegistrar: Send + Sync {
    async fn register_repository(&self, repo_url: &str) -> Result<(), GitOpsError>;
}

#[derive(Debug, thiserror::Error)]
pub enum GitOpsError {
    #[error("git provider error: {0}")]
    Provider(String),
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("repository registration failed: {0}")]
    Registration(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
