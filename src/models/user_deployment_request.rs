//! Durable record of an accepted deploy request, written in the same
//! transaction as the request-validated timeline so async hand-off can
//! always replay it.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct UserDeploymentRequest {
    pub id: i32,
    pub pipeline_id: i32,
    pub ci_artifact_id: i32,
    pub cd_workflow_id: i32,
    pub deployment_type: String,
    pub force_sync: bool,
    pub triggered_at: NaiveDateTime,
    pub triggered_by: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUserDeploymentRequest {
    pub pipeline_id: i32,
    pub ci_artifact_id: i32,
    pub cd_workflow_id: i32,
    pub deployment_type: String,
    pub force_sync: bool,
    pub triggered_at: NaiveDateTime,
    pub triggered_by: i32,
}

impl UserDeploymentRequest {
    /// Insert inside the caller's transaction; the id keys the async
    /// dispatch subject.
    pub async fn save_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewUserDeploymentRequest,
    ) -> Result<UserDeploymentRequest, sqlx::Error> {
        sqlx::query_as::<_, UserDeploymentRequest>(
            r#"
            INSERT INTO user_deployment_request
                (pipeline_id, ci_artifact_id, cd_workflow_id, deployment_type,
                 force_sync, triggered_at, triggered_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            RETURNING id, pipeline_id, ci_artifact_id, cd_workflow_id, deployment_type,
                      force_sync, triggered_at, triggered_by, created_at
            "#,
        )
        .bind(new.pipeline_id)
        .bind(new.ci_artifact_id)
        .bind(new.cd_workflow_id)
        .bind(&new.deployment_type)
        .bind(new.force_sync)
        .bind(new.triggered_at)
        .bind(new.triggered_by)
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn find_by_id(
        pool: &PgPool,
        id: i32,
    ) -> Result<Option<UserDeploymentRequest>, sqlx::Error> {
        sqlx::query_as::<_, UserDeploymentRequest>(
            r#"
            SELECT id, pipeline_id, ci_artifact_id, cd_workflow_id, deployment_type,
                   force_sync, triggered_at, triggered_by, created_at
            FROM user_deployment_request WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}
