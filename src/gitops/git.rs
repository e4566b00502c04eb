//! Git plumbing: provider REST API for repository management, local git CLI
//! for chart and values commits.

use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::GitOpsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitDetail {
    pub hash: String,
    pub committed_at: NaiveDateTime,
}

#[async_trait]
pub trait GitClient: Send + Sync {
    /// Create the remote repository if it does not exist; returns its http
    /// clone url either way.
    async fn ensure_repository(
        &self,
        repo_name: &str,
        description: &str,
    ) -> Result<String, GitOpsError>;

    /// Commit the packaged chart under `{chart_name}/{chart_version}/`.
    async fn push_chart(
        &self,
        repo_url: &str,
        chart_path: &str,
        chart_name: &str,
        chart_version: &str,
        author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError>;

    /// Commit the per-environment values file at the repository root.
    async fn commit_values(
        &self,
        repo_url: &str,
        values_file_name: &str,
        values_yaml: &str,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError>;
}

/// Thin REST client for the configured git provider.
pub struct GitProviderApi {
    http: reqwest::Client,
    base_url: String,
    organization: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    clone_url: String,
}

impl GitProviderApi {
    pub fn new(base_url: &str, organization: &str, token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            organization: organization.to_string(),
            token: token.to_string(),
        }
    }

    async fn get_repository(&self, name: &str) -> Result<Option<String>, GitOpsError> {
        let url = format!("{}/repos/{}/{}", self.base_url, self.organization, name);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| GitOpsError::Provider(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let repo: RepoResponse = response
            .error_for_status()
            .map_err(|e| GitOpsError::Provider(e.to_string()))?
            .json()
            .await
            .map_err(|e| GitOpsError::Provider(e.to_string()))?;
        Ok(Some(repo.clone_url))
    }

    async fn create_repository(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, GitOpsError> {
        let url = format!("{}/orgs/{}/repos", self.base_url, self.organization);
        let repo: RepoResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "name": name,
                "description": description,
                "private": true,
                "auto_init": true
            }))
            .send()
            .await
            .map_err(|e| GitOpsError::Provider(e.to_string()))?
            .error_for_status()
            .map_err(|e| GitOpsError::Provider(e.to_string()))?
            .json()
            .await
            .map_err(|e| GitOpsError::Provider(e.to_string()))?;
        Ok(repo.clone_url)
    }
}

/// Production [`GitClient`]: provider API for repositories, local clones in
/// a working directory for commits.
pub struct CliGitClient {
    provider: GitProviderApi,
    workdir: std::path::PathBuf,
}

impl CliGitClient {
    pub fn new(provider: GitProviderApi, workdir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            provider,
            workdir: workdir.into(),
        }
    }

    async fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitOpsError> {
        debug!(?args, dir = %dir.display(), "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await?;
        if !output.status.success() {
            return Err(GitOpsError::Commit(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Fresh shallow clone per push; repo names are unique per app so the
    /// clone directory is too.
    async fn clone_repo(&self, repo_url: &str) -> Result<std::path::PathBuf, GitOpsError> {
        let dir_name = repo_url
            .rsplit('/')
            .next()
            .unwrap_or("repo")
            .trim_end_matches(".git");
        let target = self.workdir.join(dir_name);
        if target.exists() {
            tokio::fs::remove_dir_all(&target).await?;
        }
        tokio::fs::create_dir_all(&self.workdir).await?;
        Self::run_git(
            &self.workdir,
            &["clone", "--depth", "1", repo_url, dir_name],
        )
        .await?;
        Ok(target)
    }

    async fn commit_and_push(
        dir: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError> {
        Self::run_git(dir, &["add", "-A"]).await?;
        let author_arg = format!("{} <{}>", author.name, author.email);
        Self::run_git(dir, &["commit", "--author", &author_arg, "-m", message]).await?;
        let hash = Self::run_git(dir, &["rev-parse", "HEAD"]).await?;
        let epoch = Self::run_git(dir, &["log", "-1", "--format=%ct"]).await?;
        Self::run_git(dir, &["push", "origin", "HEAD"]).await?;
        let committed_at = epoch
            .parse::<i64>()
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| GitOpsError::Commit("unreadable commit time".to_string()))?;
        Ok(CommitDetail {
            hash,
            committed_at,
        })
    }
}

#[async_trait]
impl GitClient for CliGitClient {
    async fn ensure_repository(
        &self,
        repo_name: &str,
        description: &str,
    ) -> Result<String, GitOpsError> {
        if let Some(url) = self.provider.get_repository(repo_name).await? {
            return Ok(url);
        }
        self.provider.create_repository(repo_name, description).await
    }

    async fn push_chart(
        &self,
        repo_url: &str,
        chart_path: &str,
        chart_name: &str,
        chart_version: &str,
        author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError> {
        let clone = self.clone_repo(repo_url).await?;
        let target = clone.join(chart_name).join(chart_version);
        tokio::fs::create_dir_all(&target).await?;
        copy_dir(Path::new(chart_path), &target).await?;
        Self::commit_and_push(
            &clone,
            &format!("chart {chart_name}-{chart_version}"),
            author,
        )
        .await
    }

    async fn commit_values(
        &self,
        repo_url: &str,
        values_file_name: &str,
        values_yaml: &str,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<CommitDetail, GitOpsError> {
        let clone = self.clone_repo(repo_url).await?;
        tokio::fs::write(clone.join(values_file_name), values_yaml).await?;
        Self::commit_and_push(&clone, message, author).await
    }
}

/// Recursive copy without following symlinks. Chart trees are shallow.
async fn copy_dir(from: &Path, to: &Path) -> Result<(), GitOpsError> {
    let mut stack = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = stack.pop() {
        tokio::fs::create_dir_all(&dst).await?;
        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dst_path = dst.join(entry.file_name());
            if file_type.is_dir() {
                stack.push((entry.path(), dst_path));
            } else if file_type.is_file() {
                tokio::fs::copy(entry.path(), dst_path).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_dir_copies_nested_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(src.path().join("templates"))
            .await
            .unwrap();
        tokio::fs::write(src.path().join("Chart.yaml"), "name: app-chart")
            .await
            .unwrap();
        tokio::fs::write(src.path().join("templates/deploy.yaml"), "kind: Deployment")
            .await
            .unwrap();

        copy_dir(src.path(), dst.path()).await.unwrap();

        let chart = tokio::fs::read_to_string(dst.path().join("Chart.yaml"))
            .await
            .unwrap();
        assert_eq!(chart, "name: app-chart");
        assert!(dst.path().join("templates/deploy.yaml").exists());
    }
}
