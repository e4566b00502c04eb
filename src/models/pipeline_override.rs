//! Pipeline override rows. The per-pipeline release counter doubles as the
//! release number surfaced to callers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PipelineOverride {
    pub id: i32,
    pub pipeline_id: i32,
    pub cd_workflow_id: i32,
    pub ci_artifact_id: i32,
    pub pipeline_release_counter: i32,
    pub git_hash: Option<String>,
    pub commit_time: Option<NaiveDateTime>,
    pub pipeline_merged_values: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub struct PipelineOverrideStore {
    pool: PgPool,
}

impl PipelineOverrideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Allocate the next release counter for the pipeline and persist the
    /// override in one statement, so concurrent triggers get distinct
    /// monotonically increasing release numbers.
    pub async fn save(
        &self,
        pipeline_id: i32,
        cd_workflow_id: i32,
        ci_artifact_id: i32,
        merged_values: &str,
    ) -> Result<PipelineOverride, sqlx::Error> {
        sqlx::query_as::<_, PipelineOverride>(
            r#"
            INSERT INTO pipeline_config_override
                (pipeline_id, cd_workflow_id, ci_artifact_id, pipeline_release_counter,
                 pipeline_merged_values, created_at, updated_at)
            VALUES (
                $1, $2, $3,
                COALESCE((SELECT MAX(pipeline_release_counter) FROM pipeline_config_override
                          WHERE pipeline_id = $1), 0) + 1,
                $4, NOW(), NOW()
            )
            RETURNING id, pipeline_id, cd_workflow_id, ci_artifact_id,
                      pipeline_release_counter, git_hash, commit_time,
                      pipeline_merged_values, created_at, updated_at
            "#,
        )
        .bind(pipeline_id)
        .bind(cd_workflow_id)
        .bind(ci_artifact_id)
        .bind(merged_values)
        .fetch_one(&self.pool)
        .await
    }

    /// Record the GitOps commit produced for this override.
    pub async fn set_commit(
        &self,
        id: i32,
        git_hash: &str,
        commit_time: NaiveDateTime,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE pipeline_config_override
            SET git_hash = $2, commit_time = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(git_hash)
        .bind(commit_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<PipelineOverride>, sqlx::Error> {
        sqlx::query_as::<_, PipelineOverride>(
            r#"
            SELECT id, pipeline_id, cd_workflow_id, ci_artifact_id,
                   pipeline_release_counter, git_hash, commit_time,
                   pipeline_merged_values, created_at, updated_at
            FROM pipeline_config_override WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }
}
