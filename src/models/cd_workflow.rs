//! CD workflow grouping record and the workflow runner store.
//!
//! A `CdWorkflow` groups the runners of one logical deployment; a
//! `CdWorkflowRunner` is one stage attempt. The store is the source of truth
//! for the per-deployment state machine.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::constants::messages;
use crate::state_machine::{RunnerStatus, StageKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CdWorkflow {
    pub id: i64,
    pub ci_artifact_id: i64,
    pub pipeline_id: i32,
    pub created_by: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CdWorkflowRunner {
    pub id: i64,
    pub name: String,
    pub workflow_type: String,
    pub executor_type: String,
    pub status: String,
    pub message: Option<String>,
    pub started_on: NaiveDateTime,
    pub finished_on: Option<NaiveDateTime>,
    pub namespace: String,
    pub log_location: Option<String>,
    pub pod_name: Option<String>,
    pub blob_storage_enabled: bool,
    pub cd_workflow_id: i64,
    pub ref_cd_workflow_runner_id: Option<i64>,
    pub image_path_reservation_ids: Option<Vec<i32>>,
    pub reference_id: Option<String>,
    pub triggered_by: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl CdWorkflowRunner {
    pub fn runner_status(&self) -> Option<RunnerStatus> {
        self.status.parse().ok()
    }

    pub fn stage(&self) -> Option<StageKind> {
        self.workflow_type.parse().ok()
    }

    pub fn is_terminal(&self) -> bool {
        self.runner_status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct NewCdWorkflowRunner {
    pub name: String,
    pub stage: StageKind,
    pub executor_type: String,
    pub status: RunnerStatus,
    pub namespace: String,
    pub log_location: Option<String>,
    pub blob_storage_enabled: bool,
    pub cd_workflow_id: i64,
    pub ref_cd_workflow_runner_id: Option<i64>,
    pub reference_id: Option<String>,
    pub triggered_by: i32,
}

/// Persistence for workflows and runners.
#[derive(Debug, Clone)]
pub struct CdWorkflowStore {
    pool: PgPool,
}

impl CdWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn save_workflow(
        &self,
        ci_artifact_id: i64,
        pipeline_id: i32,
        created_by: i32,
    ) -> Result<CdWorkflow, sqlx::Error> {
        sqlx::query_as::<_, CdWorkflow>(
            r#"
            INSERT INTO cd_workflow (ci_artifact_id, pipeline_id, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, ci_artifact_id, pipeline_id, created_by, created_at, updated_at
            "#,
        )
        .bind(ci_artifact_id)
        .bind(pipeline_id)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_workflow_by_id(&self, id: i64) -> Result<Option<CdWorkflow>, sqlx::Error> {
        sqlx::query_as::<_, CdWorkflow>(
            r#"
            SELECT id, ci_artifact_id, pipeline_id, created_by, created_at, updated_at
            FROM cd_workflow WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn save_runner(
        &self,
        runner: &NewCdWorkflowRunner,
    ) -> Result<CdWorkflowRunner, sqlx::Error> {
        sqlx::query_as::<_, CdWorkflowRunner>(
            r#"
            INSERT INTO cd_workflow_runner
                (name, workflow_type, executor_type, status, started_on, namespace,
                 log_location, blob_storage_enabled, cd_workflow_id,
                 ref_cd_workflow_runner_id, reference_id, triggered_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), $5, $6, $7, $8, $9, $10, $11, NOW(), NOW())
            RETURNING id, name, workflow_type, executor_type, status, message, started_on,
                      finished_on, namespace, log_location, pod_name, blob_storage_enabled,
                      cd_workflow_id, ref_cd_workflow_runner_id, image_path_reservation_ids,
                      reference_id, triggered_by, created_at, updated_at
            "#,
        )
        .bind(&runner.name)
        .bind(runner.stage.to_string())
        .bind(&runner.executor_type)
        .bind(runner.status.to_string())
        .bind(&runner.namespace)
        .bind(&runner.log_location)
        .bind(runner.blob_storage_enabled)
        .bind(runner.cd_workflow_id)
        .bind(runner.ref_cd_workflow_runner_id)
        .bind(&runner.reference_id)
        .bind(runner.triggered_by)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn find_runner_by_id(
        &self,
        id: i64,
    ) -> Result<Option<CdWorkflowRunner>, sqlx::Error> {
        sqlx::query_as::<_, CdWorkflowRunner>(
            r#"
            SELECT id, name, workflow_type, executor_type, status, message, started_on,
                   finished_on, namespace, log_location, pod_name, blob_storage_enabled,
                   cd_workflow_id, ref_cd_workflow_runner_id, image_path_reservation_ids,
                   reference_id, triggered_by, created_at, updated_at
            FROM cd_workflow_runner WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Latest runner of a given stage inside one workflow.
    pub async fn find_by_workflow_and_stage(
        &self,
        cd_workflow_id: i64,
        stage: StageKind,
    ) -> Result<Option<CdWorkflowRunner>, sqlx::Error> {
        sqlx::query_as::<_, CdWorkflowRunner>(
            r#"
            SELECT id, name, workflow_type, executor_type, status, message, started_on,
                   finished_on, namespace, log_location, pod_name, blob_storage_enabled,
                   cd_workflow_id, ref_cd_workflow_runner_id, image_path_reservation_ids,
                   reference_id, triggered_by, created_at, updated_at
            FROM cd_workflow_runner
            WHERE cd_workflow_id = $1 AND workflow_type = $2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(cd_workflow_id)
        .bind(stage.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// Latest runner of a given stage across all workflows of a pipeline.
    pub async fn find_latest_by_pipeline_and_stage(
        &self,
        pipeline_id: i32,
        stage: StageKind,
    ) -> Result<Option<CdWorkflowRunner>, sqlx::Error> {
        sqlx::query_as::<_, CdWorkflowRunner>(
            r#"
            SELECT r.id, r.name, r.workflow_type, r.executor_type, r.status, r.message,
                   r.started_on, r.finished_on, r.namespace, r.log_location, r.pod_name,
                   r.blob_storage_enabled, r.cd_workflow_id, r.ref_cd_workflow_runner_id,
                   r.image_path_reservation_ids, r.reference_id, r.triggered_by,
                   r.created_at, r.updated_at
            FROM cd_workflow_runner r
            JOIN cd_workflow w ON w.id = r.cd_workflow_id
            WHERE w.pipeline_id = $1 AND r.workflow_type = $2
            ORDER BY r.id DESC
            LIMIT 1
            "#,
        )
        .bind(pipeline_id)
        .bind(stage.to_string())
        .fetch_optional(&self.pool)
        .await
    }

    /// All non-terminal runners of a pipeline.
    pub async fn list_running_of_pipeline(
        &self,
        pipeline_id: i32,
    ) -> Result<Vec<CdWorkflowRunner>, sqlx::Error> {
        let active: Vec<String> = RunnerStatus::all_active()
            .iter()
            .map(|s| s.to_string())
            .collect();
        sqlx::query_as::<_, CdWorkflowRunner>(
            r#"
            SELECT r.id, r.name, r.workflow_type, r.executor_type, r.status, r.message,
                   r.started_on, r.finished_on, r.namespace, r.log_location, r.pod_name,
                   r.blob_storage_enabled, r.cd_workflow_id, r.ref_cd_workflow_runner_id,
                   r.image_path_reservation_ids, r.reference_id, r.triggered_by,
                   r.created_at, r.updated_at
            FROM cd_workflow_runner r
            JOIN cd_workflow w ON w.id = r.cd_workflow_id
            WHERE w.pipeline_id = $1 AND r.status = ANY($2)
            ORDER BY r.id ASC
            "#,
        )
        .bind(pipeline_id)
        .bind(&active)
        .fetch_all(&self.pool)
        .await
    }

    /// Status transition with the execution-stage audit row written in the
    /// same transaction.
    pub async fn update_with_stage_transition(
        &self,
        runner_id: i64,
        status: RunnerStatus,
        message: Option<&str>,
        updated_by: i32,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let finished = if status.is_terminal() {
            Some(Utc::now().naive_utc())
        } else {
            None
        };

        sqlx::query(
            r#"
            UPDATE cd_workflow_runner
            SET status = $2,
                message = COALESCE($3, message),
                finished_on = COALESCE($4, finished_on),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(runner_id)
        .bind(status.to_string())
        .bind(message)
        .bind(finished)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_execution_stage
                (cd_workflow_runner_id, status, message, recorded_by, recorded_at)
            VALUES ($1, $2, $3, $4, NOW())
            "#,
        )
        .bind(runner_id)
        .bind(status.to_string())
        .bind(message)
        .bind(updated_by)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    pub async fn set_pod_details(
        &self,
        runner_id: i64,
        pod_name: &str,
        log_location: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE cd_workflow_runner
            SET pod_name = $2, log_location = COALESCE($3, log_location), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(runner_id)
        .bind(pod_name)
        .bind(log_location)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_image_path_reservation_ids(
        &self,
        runner_id: i64,
        reservation_ids: &[i32],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE cd_workflow_runner
            SET image_path_reservation_ids = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(runner_id)
        .bind(reservation_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Hard delete of a corrupt runner row (unparsable status, no workload
    /// ever submitted). Only bulk re-triggers use this.
    pub async fn delete_runner(&self, runner_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query(r#"DELETE FROM cd_workflow_runner WHERE id = $1"#)
            .bind(runner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fail every non-terminal deploy runner of the pipeline that predates
    /// `before` (excluding the current runner), in one transaction.
    ///
    /// Returns the ids of the superseded runners.
    pub async fn mark_superseded(
        &self,
        pipeline_id: i32,
        excluded_runner_id: i64,
        before: NaiveDateTime,
        updated_by: i32,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let active: Vec<String> = RunnerStatus::all_active()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut tx = self.pool.begin().await?;

        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            UPDATE cd_workflow_runner r
            SET status = $1,
                message = $2,
                finished_on = NOW(),
                updated_at = NOW()
            FROM cd_workflow w
            WHERE w.id = r.cd_workflow_id
              AND w.pipeline_id = $3
              AND r.id <> $4
              AND r.workflow_type = $5
              AND r.status = ANY($6)
              AND r.started_on < $7
            RETURNING r.id
            "#,
        )
        .bind(RunnerStatus::Failed.to_string())
        .bind(messages::NEW_DEPLOYMENT_INITIATED)
        .bind(pipeline_id)
        .bind(excluded_runner_id)
        .bind(StageKind::Deploy.to_string())
        .bind(&active)
        .bind(before)
        .fetch_all(&mut *tx)
        .await?;

        for (runner_id,) in &rows {
            sqlx::query(
                r#"
                INSERT INTO workflow_execution_stage
                    (cd_workflow_runner_id, status, message, recorded_by, recorded_at)
                VALUES ($1, $2, $3, $4, NOW())
                "#,
            )
            .bind(runner_id)
            .bind(RunnerStatus::Failed.to_string())
            .bind(messages::NEW_DEPLOYMENT_INITIATED)
            .bind(updated_by)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner_with_status(status: &str) -> CdWorkflowRunner {
        let now = Utc::now().naive_utc();
        CdWorkflowRunner {
            id: 1,
            name: "p1".to_string(),
            workflow_type: "DEPLOY".to_string(),
            executor_type: "AWF".to_string(),
            status: status.to_string(),
            message: None,
            started_on: now,
            finished_on: None,
            namespace: "devtron-cd".to_string(),
            log_location: None,
            pod_name: None,
            blob_storage_enabled: false,
            cd_workflow_id: 1,
            ref_cd_workflow_runner_id: None,
            image_path_reservation_ids: None,
            reference_id: None,
            triggered_by: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_runner_status_parsing() {
        let runner = runner_with_status("Progressing");
        assert_eq!(runner.runner_status(), Some(RunnerStatus::InProgress));
        assert!(!runner.is_terminal());

        let runner = runner_with_status("Failed");
        assert!(runner.is_terminal());

        // unknown statuses are treated as non-terminal, never panicking
        let runner = runner_with_status("SomethingElse");
        assert_eq!(runner.runner_status(), None);
        assert!(!runner.is_terminal());
    }

    #[test]
    fn test_stage_parsing() {
        let runner = runner_with_status("Starting");
        assert_eq!(runner.stage(), Some(StageKind::Deploy));
    }
}
