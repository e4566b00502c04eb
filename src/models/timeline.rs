//! Deployment status timeline: append-only audit trail per runner.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use std::fmt;

/// Recognized lifecycle tags. Persisted as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineStatus {
    DeploymentInitiated,
    DeploymentRequestValidated,
    GitCommit,
    GitCommitFailed,
    ArgocdSyncInitiated,
    ArgocdSyncCompleted,
    DeploymentTriggered,
    KubectlApplyStarted,
    KubectlApplySynced,
    DeploymentSuperseded,
    DeploymentFailed,
    FoundVulnerability,
    GitopsRepoNotConfigured,
    UnableToFetchStatus,
}

impl TimelineStatus {
    /// Tags that close the timeline; once present, the deploy path treats
    /// the runner as finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::DeploymentSuperseded
                | Self::DeploymentFailed
                | Self::FoundVulnerability
                | Self::GitopsRepoNotConfigured
        )
    }

    /// Informational tags excluded when the trigger-event builder reads the
    /// timeline back.
    pub fn default_exclusions() -> &'static [TimelineStatus] {
        &[
            Self::UnableToFetchStatus,
            Self::KubectlApplyStarted,
            Self::KubectlApplySynced,
        ]
    }
}

impl fmt::Display for TimelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeploymentInitiated => "DEPLOYMENT_INITIATED",
            Self::DeploymentRequestValidated => "DEPLOYMENT_REQUEST_VALIDATED",
            Self::GitCommit => "GIT_COMMIT",
            Self::GitCommitFailed => "GIT_COMMIT_FAILED",
            Self::ArgocdSyncInitiated => "ARGOCD_SYNC_INITIATED",
            Self::ArgocdSyncCompleted => "ARGOCD_SYNC_COMPLETED",
            Self::DeploymentTriggered => "DEPLOYMENT_TRIGGERED",
            Self::KubectlApplyStarted => "KUBECTL_APPLY_STARTED",
            Self::KubectlApplySynced => "KUBECTL_APPLY_SYNCED",
            Self::DeploymentSuperseded => "DEPLOYMENT_SUPERSEDED",
            Self::DeploymentFailed => "FAILED",
            Self::FoundVulnerability => "VULNERABILITY_FOUND",
            Self::GitopsRepoNotConfigured => "GITOPS_REPO_NOT_CONFIGURED",
            Self::UnableToFetchStatus => "UNABLE_TO_FETCH_STATUS",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TimelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPLOYMENT_INITIATED" => Ok(Self::DeploymentInitiated),
            "DEPLOYMENT_REQUEST_VALIDATED" => Ok(Self::DeploymentRequestValidated),
            "GIT_COMMIT" => Ok(Self::GitCommit),
            "GIT_COMMIT_FAILED" => Ok(Self::GitCommitFailed),
            "ARGOCD_SYNC_INITIATED" => Ok(Self::ArgocdSyncInitiated),
            "ARGOCD_SYNC_COMPLETED" => Ok(Self::ArgocdSyncCompleted),
            "DEPLOYMENT_TRIGGERED" => Ok(Self::DeploymentTriggered),
            "KUBECTL_APPLY_STARTED" => Ok(Self::KubectlApplyStarted),
            "KUBECTL_APPLY_SYNCED" => Ok(Self::KubectlApplySynced),
            "DEPLOYMENT_SUPERSEDED" => Ok(Self::DeploymentSuperseded),
            "FAILED" => Ok(Self::DeploymentFailed),
            "VULNERABILITY_FOUND" => Ok(Self::FoundVulnerability),
            "GITOPS_REPO_NOT_CONFIGURED" => Ok(Self::GitopsRepoNotConfigured),
            "UNABLE_TO_FETCH_STATUS" => Ok(Self::UnableToFetchStatus),
            _ => Err(format!("Invalid timeline status: {s}")),
        }
    }
}

/// One audit entry on a runner's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PipelineStatusTimeline {
    pub id: i64,
    pub cd_workflow_runner_id: i64,
    pub status: String,
    pub status_detail: String,
    pub status_time: NaiveDateTime,
    pub created_by: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewTimeline {
    pub cd_workflow_runner_id: i64,
    pub status: TimelineStatus,
    pub status_detail: String,
    pub created_by: i32,
}

impl PipelineStatusTimeline {
    /// Idempotent append: at most one row per (runner, status). The unique
    /// index on (cd_workflow_runner_id, status) backs the conflict clause.
    pub async fn save_if_not_already_present<'e, E>(
        executor: E,
        timeline: &NewTimeline,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_status_timeline
                (cd_workflow_runner_id, status, status_detail, status_time, created_by, created_at)
            VALUES ($1, $2, $3, NOW(), $4, NOW())
            ON CONFLICT (cd_workflow_runner_id, status) DO NOTHING
            "#,
        )
        .bind(timeline.cd_workflow_runner_id)
        .bind(timeline.status.to_string())
        .bind(&timeline.status_detail)
        .bind(timeline.created_by)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All entries for a runner in insertion order, minus the exclude set.
    pub async fn get_timelines_for(
        pool: &PgPool,
        runner_id: i64,
        exclude: &[TimelineStatus],
    ) -> Result<Vec<PipelineStatusTimeline>, sqlx::Error> {
        let excluded: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        sqlx::query_as::<_, PipelineStatusTimeline>(
            r#"
            SELECT id, cd_workflow_runner_id, status, status_detail, status_time, created_by, created_at
            FROM pipeline_status_timeline
            WHERE cd_workflow_runner_id = $1 AND status <> ALL($2)
            ORDER BY status_time ASC, id ASC
            "#,
        )
        .bind(runner_id)
        .bind(&excluded)
        .fetch_all(pool)
        .await
    }

    /// Parsed status tags for a runner, used by the trigger-event builder.
    pub async fn statuses_for(
        pool: &PgPool,
        runner_id: i64,
        exclude: &[TimelineStatus],
    ) -> Result<Vec<TimelineStatus>, sqlx::Error> {
        let rows = Self::get_timelines_for(pool, runner_id, exclude).await?;
        let mut statuses = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Ok(status) = row.status.parse::<TimelineStatus>() {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_tags() {
        assert!(TimelineStatus::DeploymentFailed.is_terminal());
        assert!(TimelineStatus::FoundVulnerability.is_terminal());
        assert!(TimelineStatus::DeploymentSuperseded.is_terminal());
        assert!(TimelineStatus::GitopsRepoNotConfigured.is_terminal());
        assert!(!TimelineStatus::GitCommit.is_terminal());
        assert!(!TimelineStatus::DeploymentTriggered.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            TimelineStatus::DeploymentInitiated,
            TimelineStatus::DeploymentRequestValidated,
            TimelineStatus::GitCommit,
            TimelineStatus::ArgocdSyncCompleted,
            TimelineStatus::DeploymentTriggered,
            TimelineStatus::FoundVulnerability,
        ] {
            assert_eq!(
                status.to_string().parse::<TimelineStatus>().unwrap(),
                status
            );
        }
    }

    #[test]
    fn test_default_exclusions_hide_kubectl_noise() {
        let excluded = TimelineStatus::default_exclusions();
        assert!(excluded.contains(&TimelineStatus::KubectlApplyStarted));
        assert!(excluded.contains(&TimelineStatus::KubectlApplySynced));
        assert!(excluded.contains(&TimelineStatus::UnableToFetchStatus));
        assert!(!excluded.contains(&TimelineStatus::GitCommit));
    }
}

/// Write-side seam for components that append timelines but should never
/// fail on bookkeeping. Database-backed in production, recording fakes in
/// tests.
#[async_trait::async_trait]
pub trait TimelineSink: Send + Sync {
    async fn record(&self, runner_id: i64, status: TimelineStatus, detail: &str, created_by: i32);
}

pub struct DbTimelineSink {
    pool: PgPool,
}

impl DbTimelineSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TimelineSink for DbTimelineSink {
    async fn record(&self, runner_id: i64, status: TimelineStatus, detail: &str, created_by: i32) {
        let timeline = NewTimeline {
            cd_workflow_runner_id: runner_id,
            status,
            status_detail: detail.to_string(),
            created_by,
        };
        if let Err(err) =
            PipelineStatusTimeline::save_if_not_already_present(&self.pool, &timeline).await
        {
            crate::logging::report_non_fatal("timeline_save", &err);
        }
    }
}
