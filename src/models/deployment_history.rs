//! Trigger audit history. Written best-effort: a failed history insert never
//! fails the trigger itself.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DeploymentTriggerHistory {
    pub id: i32,
    pub pipeline_id: i32,
    pub cd_workflow_id: i32,
    pub ci_artifact_id: i32,
    pub deployment_type: String,
    pub triggered_by: i32,
    pub triggered_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewDeploymentTriggerHistory {
    pub pipeline_id: i32,
    pub cd_workflow_id: i32,
    pub ci_artifact_id: i32,
    pub deployment_type: String,
    pub triggered_by: i32,
    pub triggered_at: NaiveDateTime,
}

impl DeploymentTriggerHistory {
    pub async fn save(
        pool: &PgPool,
        new: &NewDeploymentTriggerHistory,
    ) -> Result<DeploymentTriggerHistory, sqlx::Error> {
        sqlx::query_as::<_, DeploymentTriggerHistory>(
            r#"
            INSERT INTO deployment_trigger_history
                (pipeline_id, cd_workflow_id, ci_artifact_id, deployment_type,
                 triggered_by, triggered_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, pipeline_id, cd_workflow_id, ci_artifact_id,
                      deployment_type, triggered_by, triggered_at, created_at
            "#,
        )
        .bind(new.pipeline_id)
        .bind(new.cd_workflow_id)
        .bind(new.ci_artifact_id)
        .bind(&new.deployment_type)
        .bind(new.triggered_by)
        .bind(new.triggered_at)
        .fetch_one(pool)
        .await
    }
}
