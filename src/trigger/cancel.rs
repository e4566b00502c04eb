//! Stage cancellation with force-abort semantics.

use tracing::{info, instrument};

use super::errors::TriggerError;
use super::service::TriggerService;
use crate::executor::{ClusterRestConfig, ExecutorError};
use crate::logging::report_non_fatal;
use crate::models::{Cluster, Environment, ImagePathReservation, Pipeline};
use crate::state_machine::{RunnerStateMachine, RunnerStatus, StageKind};

impl TriggerService {
    /// Cancel a pre/post stage runner.
    ///
    /// The named workload is terminated first; a missing workload is a user
    /// error unless `force_abort` is set, in which case the runner is
    /// cancelled regardless and every workload labelled with the workflow id
    /// is deleted best-effort.
    #[instrument(skip(self), fields(runner_id, force_abort))]
    pub async fn cancel_stage(
        &self,
        runner_id: i64,
        force_abort: bool,
        cancelled_by: i32,
    ) -> Result<(), TriggerError> {
        let runner = self
            .store()
            .find_runner_by_id(runner_id)
            .await?
            .ok_or_else(|| TriggerError::Validation(format!("runner {runner_id} not found")))?;

        let stage = runner
            .stage()
            .ok_or_else(|| TriggerError::Precondition("runner stage is unreadable".to_string()))?;
        if stage == StageKind::Deploy {
            return Err(TriggerError::Validation(
                "deploy runners are superseded by new triggers, not cancelled".to_string(),
            ));
        }
        let status = runner.runner_status().ok_or_else(|| {
            TriggerError::Precondition(format!("runner status {} is unreadable", runner.status))
        })?;
        RunnerStateMachine::check_cancel_guard(status, force_abort)
            .map_err(|err| TriggerError::Precondition(err.to_string()))?;

        let cluster_config = self.stage_cluster_config(&runner.cd_workflow_id, stage).await?;
        let workload_name = runner.pod_name.clone().unwrap_or_else(|| runner.name.clone());

        let executor_kind = runner
            .executor_type
            .parse()
            .unwrap_or_else(|_| self.config().executor_kind());
        let executor = self
            .executor_for(executor_kind)
            .ok_or_else(|| TriggerError::Internal("no executor registered".to_string()))?;

        match executor
            .terminate(&cluster_config, &workload_name, &runner.namespace)
            .await
        {
            Ok(()) => {}
            Err(ExecutorError::NotFound { .. }) if force_abort => {
                info!(%workload_name, "workload already gone; force abort proceeds");
            }
            Err(err) => return Err(err.into()),
        }

        if force_abort {
            if let Err(err) = executor
                .terminate_dangling(
                    &cluster_config,
                    runner.cd_workflow_id as i32,
                    &runner.namespace,
                )
                .await
            {
                report_non_fatal("terminate_dangling", &err);
            }
        }

        self.store()
            .update_with_stage_transition(
                runner.id,
                RunnerStatus::Cancelled,
                Some("cancelled by user"),
                cancelled_by,
            )
            .await?;

        if let Some(reservation_ids) = &runner.image_path_reservation_ids {
            if let Err(err) = ImagePathReservation::deactivate(self.pool(), reservation_ids).await {
                report_non_fatal("reservation_release", &err);
            }
        }

        info!(runner_id, force_abort, "stage runner cancelled");
        Ok(())
    }

    /// Cluster connection for the runner's stage, re-resolved from the
    /// pipeline's run-in-env flag.
    async fn stage_cluster_config(
        &self,
        cd_workflow_id: &i64,
        stage: StageKind,
    ) -> Result<ClusterRestConfig, TriggerError> {
        let workflow = self
            .store()
            .find_workflow_by_id(*cd_workflow_id)
            .await?
            .ok_or_else(|| TriggerError::Precondition("workflow vanished".to_string()))?;
        let pipeline = Pipeline::find_by_id(self.pool(), workflow.pipeline_id)
            .await?
            .ok_or_else(|| {
                TriggerError::Validation(format!("pipeline {} not found", workflow.pipeline_id))
            })?;

        let run_in_env = match stage {
            StageKind::Pre => pipeline.run_pre_stage_in_env,
            StageKind::Post => pipeline.run_post_stage_in_env,
            StageKind::Deploy => false,
        };
        if !run_in_env {
            return Ok(ClusterRestConfig::in_cluster());
        }

        let environment = Environment::find_by_id(self.pool(), pipeline.environment_id)
            .await?
            .ok_or_else(|| TriggerError::Validation("environment not found".to_string()))?;
        let cluster = Cluster::find_by_id(self.pool(), environment.cluster_id)
            .await?
            .ok_or_else(|| TriggerError::Validation("cluster not found".to_string()))?;
        Ok(ClusterRestConfig {
            host: cluster.server_url.clone(),
            bearer_token: cluster.bearer_token.clone(),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            ca_data: if cluster.insecure_skip_tls_verify {
                None
            } else {
                cluster.ca_data.clone()
            },
        })
    }
}
