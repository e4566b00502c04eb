//! Per (app, environment) deployment configuration with a CAS version column.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::sentinels;

pub mod release_mode {
    pub const CREATE: &str = "create";
    pub const LINK: &str = "link";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DeploymentConfig {
    pub id: i32,
    pub app_id: i32,
    pub environment_id: i32,
    pub deployment_app_type: String,
    pub config_type: String,
    pub repo_url: String,
    pub release_mode: String,
    pub use_custom_gitops_repo: bool,
    pub chart_location: Option<String>,
    pub target_revision: Option<String>,
    pub value_file: Option<String>,
    pub active: bool,
    pub version: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DeploymentConfig {
    pub fn is_repo_configured(&self) -> bool {
        !self.repo_url.is_empty() && self.repo_url != sentinels::GITOPS_REPO_NOT_CONFIGURED
    }

    pub fn is_linked_release(&self) -> bool {
        self.release_mode == release_mode::LINK
    }

    /// Linked releases and apps that opted into a custom GitOps repository
    /// cannot auto-create one; both must have a repo before deploying.
    pub fn requires_configured_repo(&self) -> bool {
        self.is_linked_release() || self.use_custom_gitops_repo
    }

    pub async fn find_active(
        pool: &PgPool,
        app_id: i32,
        environment_id: i32,
    ) -> Result<Option<DeploymentConfig>, sqlx::Error> {
        sqlx::query_as::<_, DeploymentConfig>(
            r#"
            SELECT id, app_id, environment_id, deployment_app_type, config_type,
                   repo_url, release_mode, use_custom_gitops_repo, chart_location,
                   target_revision, value_file, active, version, created_at, updated_at
            FROM deployment_config
            WHERE app_id = $1 AND environment_id = $2 AND active = true
            "#,
        )
        .bind(app_id)
        .bind(environment_id)
        .fetch_optional(pool)
        .await
    }

    /// Compare-and-swap on the version column. Returns false when a
    /// concurrent writer bumped the version first; the caller re-reads.
    pub async fn update_repo_url_cas(
        pool: &PgPool,
        id: i32,
        expected_version: i32,
        repo_url: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE deployment_config
            SET repo_url = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(repo_url)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn config(repo_url: &str, mode: &str) -> DeploymentConfig {
        let now = Utc::now().naive_utc();
        DeploymentConfig {
            id: 1,
            app_id: 10,
            environment_id: 4,
            deployment_app_type: "argo_cd".to_string(),
            config_type: "custom".to_string(),
            repo_url: repo_url.to_string(),
            release_mode: mode.to_string(),
            use_custom_gitops_repo: false,
            chart_location: Some("app-chart/4.18.1".to_string()),
            target_revision: Some("master".to_string()),
            value_file: None,
            active: true,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_repo_configured_checks_sentinel_and_empty() {
        assert!(config("https://git.example.com/acme/app", release_mode::CREATE).is_repo_configured());
        assert!(!config(sentinels::GITOPS_REPO_NOT_CONFIGURED, release_mode::CREATE).is_repo_configured());
        assert!(!config("", release_mode::CREATE).is_repo_configured());
    }

    #[test]
    fn test_linked_release_mode() {
        assert!(config("u", release_mode::LINK).is_linked_release());
        assert!(!config("u", release_mode::CREATE).is_linked_release());
    }

    #[test]
    fn test_custom_gitops_repo_requires_configured_url() {
        let mut cfg = config("", release_mode::CREATE);
        assert!(!cfg.requires_configured_repo());

        cfg.use_custom_gitops_repo = true;
        assert!(cfg.requires_configured_repo());
        assert!(!cfg.is_repo_configured());

        assert!(config("u", release_mode::LINK).requires_configured_repo());
    }
}
