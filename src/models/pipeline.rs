//! CD pipeline: one app x one environment x one deployment backend.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::state_machine::DeploymentAppType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Pipeline {
    pub id: i32,
    pub name: String,
    pub app_id: i32,
    pub app_name: String,
    pub environment_id: i32,
    pub deployment_app_type: String,
    pub deployment_app_name: String,
    pub pre_stage_config: Option<String>,
    pub post_stage_config: Option<String>,
    pub run_pre_stage_in_env: bool,
    pub run_post_stage_in_env: bool,
    pub deployment_app_created: bool,
    pub deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Pipeline {
    pub fn backend_kind(&self) -> Option<DeploymentAppType> {
        self.deployment_app_type.parse().ok()
    }

    pub async fn find_by_id(pool: &PgPool, id: i32) -> Result<Option<Pipeline>, sqlx::Error> {
        sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT id, name, app_id, app_name, environment_id, deployment_app_type,
                   deployment_app_name, pre_stage_config, post_stage_config,
                   run_pre_stage_in_env, run_post_stage_in_env, deployment_app_created,
                   deleted, created_at, updated_at
            FROM pipeline
            WHERE id = $1 AND deleted = false
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// All live pipelines of an app. Stage workflows advertise the sibling
    /// environments through CHILD_CD variables.
    pub async fn list_for_app(pool: &PgPool, app_id: i32) -> Result<Vec<Pipeline>, sqlx::Error> {
        sqlx::query_as::<_, Pipeline>(
            r#"
            SELECT id, name, app_id, app_name, environment_id, deployment_app_type,
                   deployment_app_name, pre_stage_config, post_stage_config,
                   run_pre_stage_in_env, run_post_stage_in_env, deployment_app_created,
                   deleted, created_at, updated_at
            FROM pipeline
            WHERE app_id = $1 AND deleted = false
            ORDER BY id
            "#,
        )
        .bind(app_id)
        .fetch_all(pool)
        .await
    }

    /// Persist `deployment_app_created = true`; once set it is never unset
    /// so retries cannot orphan a half-created backend app.
    pub async fn set_deployment_app_created(
        pool: &PgPool,
        pipeline_id: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE pipeline SET deployment_app_created = true, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(pipeline_id)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// App labels injected into stage workflows as APP_LABEL_KEY_n / VALUE_n.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AppLabel {
    pub id: i32,
    pub app_id: i32,
    pub key: String,
    pub value: String,
}

impl AppLabel {
    pub async fn list_for_app(pool: &PgPool, app_id: i32) -> Result<Vec<AppLabel>, sqlx::Error> {
        sqlx::query_as::<_, AppLabel>(
            r#"SELECT id, app_id, key, value FROM app_label WHERE app_id = $1 ORDER BY id"#,
        )
        .bind(app_id)
        .fetch_all(pool)
        .await
    }
}
