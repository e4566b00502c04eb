//! The deploy-stage trigger path: request validation, feasibility gates,
//! manifest publication, backend deploy, and the bookkeeping around them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::errors::TriggerError;
use super::event::{TriggerDecision, TriggerEvent};
use super::outcome::{BlockReason, FeasibilityOutcome, TriggerOutcome};
use crate::config::DeployCoreConfig;
use crate::constants::{messages, topics};
use crate::deployment::{BackendDeployRequest, DeploymentBackend};
use crate::events::{
    DeploymentEvent, EventPublisher, EventWriter, LifecycleEvent, PipelineMaterialCommit,
};
use crate::gitops::{ManifestPushService, ManifestPushTemplate};
use crate::logging::report_non_fatal;
use crate::metrics::TriggerMetrics;
use crate::models::timeline::{PipelineStatusTimeline, TimelineSink, TimelineStatus};
use crate::models::{
    CdWorkflowRunner, CdWorkflowStore, CiArtifact, Cluster, DeploymentConfig,
    DeploymentTriggerHistory, Environment, ImageScanStore, NewCdWorkflowRunner,
    NewDeploymentTriggerHistory, NewTimeline, NewUserDeploymentRequest, Pipeline,
    PipelineOverrideStore, UserDeploymentRequest, SCAN_DISABLED_HISTORY_ID,
};
use crate::resilience::Backoff;
use crate::state_machine::{
    DeploymentAppType, DeploymentType, RunnerEvent, RunnerStateMachine, RunnerStatus, StageKind,
};

/// A deploy request as accepted at the API boundary.
#[derive(Debug, Clone)]
pub struct DeployTriggerRequest {
    pub pipeline_id: i32,
    pub artifact_id: i32,
    pub deployment_type: DeploymentType,
    pub force_sync: bool,
    pub triggered_by: i32,
    pub author_name: String,
    pub author_email: String,
    pub triggered_at: NaiveDateTime,
}

/// Builds the deployable manifest (chart reference + merged values) for a
/// release. Chart templating itself lives behind this seam.
#[async_trait]
pub trait ManifestBuilder: Send + Sync {
    async fn build(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        environment: &Environment,
    ) -> Result<BuiltManifest, TriggerError>;
}

#[derive(Debug, Clone)]
pub struct BuiltManifest {
    pub chart_name: String,
    pub chart_version: String,
    /// Local directory with the packaged chart, for gitops pushes.
    pub chart_path: String,
    /// Packaged chart bytes, for custom-chart helm installs.
    pub chart_content: Option<Vec<u8>>,
    pub merged_values_yaml: String,
    /// Helm history retention for this release source.
    pub history_max: i32,
}

/// Hands validated requests to the durable async dispatcher.
#[async_trait]
pub trait DeployRequestDispatcher: Send + Sync {
    async fn dispatch(&self, request: &UserDeploymentRequest) -> Result<(), TriggerError>;
}

pub struct TriggerService {
    pub(crate) pool: PgPool,
    pub(crate) config: Arc<DeployCoreConfig>,
    pub(crate) store: CdWorkflowStore,
    pub(crate) timelines: Arc<dyn TimelineSink>,
    pub(crate) scans: Arc<ImageScanStore>,
    pub(crate) overrides: Arc<PipelineOverrideStore>,
    pub(crate) manifests: Arc<dyn ManifestBuilder>,
    pub(crate) manifest_push: Arc<dyn ManifestPushService>,
    pub(crate) backends: HashMap<DeploymentAppType, Arc<dyn DeploymentBackend>>,
    pub(crate) executors: HashMap<crate::state_machine::ExecutorKind, Arc<dyn crate::executor::WorkflowExecutor>>,
    pub(crate) dispatcher: Option<Arc<dyn DeployRequestDispatcher>>,
    pub(crate) events: EventPublisher,
    pub(crate) event_writer: Option<Arc<dyn EventWriter>>,
    pub(crate) metrics: TriggerMetrics,
    pub(crate) scan_backoff: Backoff,
}

impl TriggerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        config: Arc<DeployCoreConfig>,
        timelines: Arc<dyn TimelineSink>,
        manifests: Arc<dyn ManifestBuilder>,
        manifest_push: Arc<dyn ManifestPushService>,
        backends: HashMap<DeploymentAppType, Arc<dyn DeploymentBackend>>,
        executors: HashMap<crate::state_machine::ExecutorKind, Arc<dyn crate::executor::WorkflowExecutor>>,
        dispatcher: Option<Arc<dyn DeployRequestDispatcher>>,
        event_writer: Option<Arc<dyn EventWriter>>,
    ) -> Self {
        let store = CdWorkflowStore::new(pool.clone());
        let scans = Arc::new(ImageScanStore::new(pool.clone()));
        let overrides = Arc::new(PipelineOverrideStore::new(pool.clone()));
        Self {
            pool,
            config,
            store,
            timelines,
            scans,
            overrides,
            manifests,
            manifest_push,
            backends,
            executors,
            dispatcher,
            events: EventPublisher::default(),
            event_writer,
            metrics: TriggerMetrics::new(),
            scan_backoff: Backoff::default(),
        }
    }

    pub fn metrics(&self) -> &TriggerMetrics {
        &self.metrics
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn store(&self) -> &CdWorkflowStore {
        &self.store
    }

    pub(crate) fn config(&self) -> &DeployCoreConfig {
        &self.config
    }

    pub(crate) fn executor_for(
        &self,
        kind: crate::state_machine::ExecutorKind,
    ) -> Option<Arc<dyn crate::executor::WorkflowExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Manual deploy trigger: creates the workflow + runner, validates, and
    /// either runs the deploy inline or hands it to the async dispatcher.
    ///
    /// The deploy namespace must exist on the target cluster; a user pointing
    /// a pipeline at a deleted namespace gets a precondition error before any
    /// rows are written.
    #[instrument(skip(self, request), fields(pipeline_id = request.pipeline_id, artifact_id = request.artifact_id))]
    pub async fn manual_trigger(
        &self,
        request: &DeployTriggerRequest,
    ) -> Result<TriggerOutcome, TriggerError> {
        let (pipeline, artifact, environment, cluster) = self.load_context(request).await?;
        self.ensure_namespace_reachable(&cluster, &environment.namespace)
            .await?;
        self.start_deploy(&pipeline, &artifact, &environment, request)
            .await
    }

    async fn start_deploy(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        environment: &Environment,
        request: &DeployTriggerRequest,
    ) -> Result<TriggerOutcome, TriggerError> {
        let workflow = self
            .store
            .save_workflow(artifact.id as i64, pipeline.id, request.triggered_by)
            .await?;
        let runner = self
            .store
            .save_runner(&NewCdWorkflowRunner {
                name: pipeline.name.clone(),
                stage: StageKind::Deploy,
                executor_type: self.config.cd_workflow_executor_type.clone(),
                status: RunnerStatus::Initiated,
                namespace: environment.namespace.clone(),
                log_location: None,
                blob_storage_enabled: self.config.blob_storage_enabled,
                cd_workflow_id: workflow.id,
                ref_cd_workflow_runner_id: None,
                reference_id: None,
                triggered_by: request.triggered_by,
            })
            .await?;

        self.timelines
            .record(
                runner.id,
                TimelineStatus::DeploymentInitiated,
                "Deployment initiated successfully.",
                request.triggered_by,
            )
            .await;

        // The new trigger wins as soon as its runner exists: older in-flight
        // deploys are failed here, not only after this one succeeds, so a
        // deploy that later blocks or errors cannot leave them dangling.
        self.supersede_previous_deployments(
            pipeline.id,
            runner.id,
            request.triggered_at,
            request.triggered_by,
        )
        .await?;

        self.handle_cd_trigger_release(pipeline, artifact, &runner, request)
            .await
    }

    /// Fail every older in-flight deploy runner of the pipeline and stamp
    /// the superseded tag on each.
    pub(crate) async fn supersede_previous_deployments(
        &self,
        pipeline_id: i32,
        exclude_runner_id: i64,
        before: chrono::NaiveDateTime,
        triggered_by: i32,
    ) -> Result<(), TriggerError> {
        let superseded = self
            .store
            .mark_superseded(pipeline_id, exclude_runner_id, before, triggered_by)
            .await?;
        for superseded_id in &superseded {
            self.timelines
                .record(
                    *superseded_id,
                    TimelineStatus::DeploymentSuperseded,
                    messages::NEW_DEPLOYMENT_INITIATED,
                    triggered_by,
                )
                .await;
        }
        Ok(())
    }

    /// Manual triggers verify the deploy namespace before writing any rows;
    /// automatic triggers trust the environment record.
    async fn ensure_namespace_reachable(
        &self,
        cluster: &Cluster,
        namespace: &str,
    ) -> Result<(), TriggerError> {
        let config = super::stage::external_cluster_config(cluster);
        let exists = crate::executor::namespace_exists(&config, namespace)
            .await
            .map_err(|e| TriggerError::BackendTransient(e.to_string()))?;
        if !exists {
            return Err(TriggerError::Precondition(format!(
                "namespace {namespace} does not exist on cluster {}",
                cluster.cluster_name
            )));
        }
        Ok(())
    }

    /// Automatic trigger after a successful upstream stage; runs as the
    /// system user with plain deploy semantics.
    pub async fn trigger_automatic_deployment(
        &self,
        pipeline_id: i32,
        artifact_id: i32,
    ) -> Result<TriggerOutcome, TriggerError> {
        let request = DeployTriggerRequest {
            pipeline_id,
            artifact_id,
            deployment_type: DeploymentType::Deploy,
            force_sync: false,
            triggered_by: crate::constants::system::SYSTEM_USER_ID,
            author_name: "system".to_string(),
            author_email: "system@devtron.ai".to_string(),
            triggered_at: chrono::Utc::now().naive_utc(),
        };
        let (pipeline, artifact, environment, _cluster) = self.load_context(&request).await?;
        self.start_deploy(&pipeline, &artifact, &environment, &request)
            .await
    }

    /// Persist the durable request and the request-validated timeline in one
    /// transaction, then decide sync vs async.
    pub(crate) async fn handle_cd_trigger_release(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        runner: &CdWorkflowRunner,
        request: &DeployTriggerRequest,
    ) -> Result<TriggerOutcome, TriggerError> {
        let mut tx = self.pool.begin().await.map_err(TriggerError::from)?;
        let deployment_request = UserDeploymentRequest::save_in_tx(
            &mut tx,
            &NewUserDeploymentRequest {
                pipeline_id: pipeline.id,
                ci_artifact_id: artifact.id,
                cd_workflow_id: runner.cd_workflow_id as i32,
                deployment_type: request.deployment_type.to_string(),
                force_sync: request.force_sync,
                triggered_at: request.triggered_at,
                triggered_by: request.triggered_by,
            },
        )
        .await?;
        PipelineStatusTimeline::save_if_not_already_present(
            &mut *tx,
            &NewTimeline {
                cd_workflow_runner_id: runner.id,
                status: TimelineStatus::DeploymentRequestValidated,
                status_detail: "Deployment request validated.".to_string(),
                created_by: request.triggered_by,
            },
        )
        .await?;
        tx.commit().await.map_err(TriggerError::from)?;

        let backend = pipeline
            .backend_kind()
            .ok_or_else(|| TriggerError::Validation("unknown deployment app type".to_string()))?;
        let go_async = match backend {
            DeploymentAppType::Helm => self.config.async_helm_enabled(request.force_sync),
            DeploymentAppType::Argocd => self.config.async_argocd_enabled(request.force_sync),
            _ => false,
        };

        if go_async {
            if let Some(dispatcher) = &self.dispatcher {
                dispatcher.dispatch(&deployment_request).await?;
                info!(
                    user_deployment_request_id = deployment_request.id,
                    "deploy request dispatched asynchronously"
                );
                return Ok(TriggerOutcome::Dispatched {
                    user_deployment_request_id: deployment_request.id,
                });
            }
        }

        self.trigger_release(pipeline, artifact, runner, request, &CancellationToken::new())
            .await
    }

    /// Re-entry point for the async dispatcher: rebuild the context from the
    /// durable request and run the release.
    pub async fn trigger_release_by_request_id(
        &self,
        user_deployment_request_id: i32,
        cancel: &CancellationToken,
    ) -> Result<TriggerOutcome, TriggerError> {
        let stored = UserDeploymentRequest::find_by_id(&self.pool, user_deployment_request_id)
            .await?
            .ok_or_else(|| {
                TriggerError::Validation(format!(
                    "user deployment request {user_deployment_request_id} not found"
                ))
            })?;

        let request = DeployTriggerRequest {
            pipeline_id: stored.pipeline_id,
            artifact_id: stored.ci_artifact_id,
            deployment_type: stored.deployment_type.parse().map_err(|_| {
                TriggerError::Validation(format!(
                    "unknown deployment type {}",
                    stored.deployment_type
                ))
            })?,
            force_sync: stored.force_sync,
            triggered_by: stored.triggered_by,
            author_name: "system".to_string(),
            author_email: "system@devtron.ai".to_string(),
            triggered_at: stored.triggered_at,
        };

        let (pipeline, artifact, _environment, _cluster) = self.load_context(&request).await?;
        let runner = self
            .store
            .find_by_workflow_and_stage(stored.cd_workflow_id as i64, StageKind::Deploy)
            .await?
            .ok_or_else(|| TriggerError::Precondition("deploy runner vanished".to_string()))?;

        self.trigger_release(&pipeline, &artifact, &runner, &request, cancel)
            .await
    }

    /// The deploy path proper: feasibility, idempotent step planning,
    /// manifest publication, backend deploy, supersession.
    #[instrument(skip_all, fields(runner_id = runner.id, pipeline_id = pipeline.id))]
    pub async fn trigger_release(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        runner: &CdWorkflowRunner,
        request: &DeployTriggerRequest,
        cancel: &CancellationToken,
    ) -> Result<TriggerOutcome, TriggerError> {
        let environment = Environment::find_by_id(&self.pool, pipeline.environment_id)
            .await?
            .ok_or_else(|| TriggerError::Validation("environment not found".to_string()))?;
        let cluster = Cluster::find_by_id(&self.pool, environment.cluster_id)
            .await?
            .ok_or_else(|| TriggerError::Validation("cluster not found".to_string()))?;
        let backend_kind = pipeline
            .backend_kind()
            .ok_or_else(|| TriggerError::Validation("unknown deployment app type".to_string()))?;
        let deployment_config =
            DeploymentConfig::find_active(&self.pool, pipeline.app_id, pipeline.environment_id)
                .await?;

        if let FeasibilityOutcome::Blocked(block) = self
            .check_feasibility(pipeline, artifact, &deployment_config, backend_kind, request)
            .await?
        {
            let reason = block.to_string();
            self.timelines
                .record(runner.id, block.timeline_status(), &reason, request.triggered_by)
                .await;
            if let Err(err) = self
                .store
                .update_with_stage_transition(
                    runner.id,
                    RunnerStatus::Failed,
                    Some(&reason),
                    request.triggered_by,
                )
                .await
            {
                report_non_fatal("runner_fail", &err);
            }
            return Err(block.into());
        }

        // Step planning over what previous attempts already completed.
        let statuses = PipelineStatusTimeline::statuses_for(
            &self.pool,
            runner.id,
            TimelineStatus::default_exclusions(),
        )
        .await?;
        let event = match TriggerEvent::build(backend_kind, &statuses, request.triggered_by) {
            TriggerDecision::Proceed(event) => event,
            TriggerDecision::Skip { reason } => {
                info!(%reason, "trigger skipped");
                return Ok(TriggerOutcome::Skipped { reason });
            }
            TriggerDecision::Superseded => return Ok(TriggerOutcome::Superseded),
        };

        // Audit history goes in before the manifest build so a failed build
        // still leaves a trace of the attempt.
        if let Err(err) = DeploymentTriggerHistory::save(
            &self.pool,
            &NewDeploymentTriggerHistory {
                pipeline_id: pipeline.id,
                cd_workflow_id: runner.cd_workflow_id as i32,
                ci_artifact_id: artifact.id,
                deployment_type: request.deployment_type.to_string(),
                triggered_by: request.triggered_by,
                triggered_at: request.triggered_at,
            },
        )
        .await
        {
            report_non_fatal("trigger_history", &err);
        }

        let manifest = self
            .manifests
            .build(pipeline, artifact, &environment)
            .await?;
        let pipeline_override = self
            .overrides
            .save(
                pipeline.id,
                runner.cd_workflow_id as i32,
                artifact.id,
                &manifest.merged_values_yaml,
            )
            .await?;
        let release_no = pipeline_override.pipeline_release_counter;

        let mut repo_url = deployment_config
            .as_ref()
            .map(|c| c.repo_url.clone())
            .unwrap_or_default();

        if event.perform_chart_push {
            let push = self
                .manifest_push
                .push_chart(&ManifestPushTemplate {
                    runner_id: runner.id,
                    app_id: pipeline.app_id,
                    app_name: pipeline.app_name.clone(),
                    environment_id: pipeline.environment_id,
                    pipeline_override_id: pipeline_override.id,
                    repo_url: repo_url.clone(),
                    linked_release: deployment_config
                        .as_ref()
                        .map(|c| c.is_linked_release())
                        .unwrap_or(false),
                    chart_name: manifest.chart_name.clone(),
                    chart_version: manifest.chart_version.clone(),
                    chart_path: manifest.chart_path.clone(),
                    merged_values_yaml: manifest.merged_values_yaml.clone(),
                    triggered_by: request.triggered_by,
                    author_name: request.author_name.clone(),
                    author_email: request.author_email.clone(),
                    manual_argo_sync: backend_kind.is_argo()
                        && self.config.argocd.is_manual_sync_enabled(),
                })
                .await?;

            if let Err(err) = self
                .overrides
                .set_commit(pipeline_override.id, &push.commit_hash, push.commit_time)
                .await
            {
                report_non_fatal("override_commit", &err);
            }
            if let Some(new_url) = push.new_repo_url {
                self.persist_repo_url(&deployment_config, &new_url).await?;
                repo_url = new_url;
            }
        }

        if event.deploy_app_on_cluster {
            let deploy_request = BackendDeployRequest {
                pipeline_id: pipeline.id,
                app_id: pipeline.app_id,
                app_name: pipeline.app_name.clone(),
                environment_id: environment.id,
                environment_name: environment.name.clone(),
                namespace: environment.namespace.clone(),
                runner_id: runner.id,
                release_name: pipeline.deployment_app_name.clone(),
                cluster: cluster.grpc_config(),
                repo_url,
                chart_name: manifest.chart_name.clone(),
                chart_version: manifest.chart_version.clone(),
                target_revision: deployment_config
                    .as_ref()
                    .and_then(|c| c.target_revision.clone())
                    .unwrap_or_else(|| "master".to_string()),
                merged_values_yaml: manifest.merged_values_yaml.clone(),
                chart_content: manifest.chart_content.clone(),
                deployment_app_created: pipeline.deployment_app_created,
                history_max: manifest.history_max,
                triggered_by: request.triggered_by,
            };
            self.deploy_app(pipeline, runner, backend_kind, &deploy_request, cancel)
                .await?;
        }

        // Sweep again after the deploy: anything that slipped in between the
        // entry sweep and now still loses to this runner.
        self.supersede_previous_deployments(
            pipeline.id,
            runner.id,
            request.triggered_at,
            request.triggered_by,
        )
        .await?;

        // Legality check against the transition table: a terminal runner
        // must never be pushed back into progress.
        let next = match runner.runner_status() {
            Some(current) => {
                RunnerStateMachine::determine_target_status(current, &RunnerEvent::Progress)
                    .map_err(|err| TriggerError::Precondition(err.to_string()))?
            }
            None => RunnerStatus::InProgress,
        };
        self.store
            .update_with_stage_transition(runner.id, next, None, request.triggered_by)
            .await?;
        self.timelines
            .record(
                runner.id,
                TimelineStatus::DeploymentTriggered,
                "Deployment triggered successfully.",
                request.triggered_by,
            )
            .await;

        self.mark_image_scan_deployed(pipeline, artifact).await;
        self.write_cd_trigger_event(pipeline, artifact, &environment, runner.id, release_no, pipeline_override.id, request)
            .await;

        info!(release_no, "deployment triggered");
        Ok(TriggerOutcome::Completed { release_no })
    }

    /// Run the backend deploy under the cancellation token. Cancellation is
    /// mapped to Superseded here and nowhere else.
    async fn deploy_app(
        &self,
        pipeline: &Pipeline,
        runner: &CdWorkflowRunner,
        backend_kind: DeploymentAppType,
        deploy_request: &BackendDeployRequest,
        cancel: &CancellationToken,
    ) -> Result<(), TriggerError> {
        let backend = self.backends.get(&backend_kind).ok_or_else(|| {
            TriggerError::Internal(format!("no backend registered for {backend_kind}"))
        })?;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(crate::deployment::DeploymentError::Cancelled),
            result = backend.deploy(deploy_request) => result,
        };

        match result {
            Ok(_) => {
                if !pipeline.deployment_app_created {
                    Pipeline::set_deployment_app_created(&self.pool, pipeline.id).await?;
                }
                Ok(())
            }
            Err(err) => {
                let persist = err.persist_app_created();
                if persist && !pipeline.deployment_app_created {
                    Pipeline::set_deployment_app_created(&self.pool, pipeline.id).await?;
                }
                let mapped: TriggerError = err.into();
                if matches!(mapped, TriggerError::Superseded) {
                    self.store
                        .update_with_stage_transition(
                            runner.id,
                            RunnerStatus::Failed,
                            Some(messages::NEW_DEPLOYMENT_INITIATED),
                            deploy_request.triggered_by,
                        )
                        .await?;
                    self.timelines
                        .record(
                            runner.id,
                            TimelineStatus::DeploymentSuperseded,
                            messages::NEW_DEPLOYMENT_INITIATED,
                            deploy_request.triggered_by,
                        )
                        .await;
                } else {
                    self.store
                        .update_with_stage_transition(
                            runner.id,
                            RunnerStatus::Failed,
                            Some(&mapped.to_string()),
                            deploy_request.triggered_by,
                        )
                        .await?;
                    self.timelines
                        .record(
                            runner.id,
                            TimelineStatus::DeploymentFailed,
                            &mapped.to_string(),
                            deploy_request.triggered_by,
                        )
                        .await;
                }
                Err(mapped)
            }
        }
    }

    /// Vulnerability gate and custom-GitOps validation.
    pub(crate) async fn check_feasibility(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        deployment_config: &Option<DeploymentConfig>,
        backend_kind: DeploymentAppType,
        request: &DeployTriggerRequest,
    ) -> Result<FeasibilityOutcome, TriggerError> {
        if !request.deployment_type.skips_vulnerability_gate() && artifact.scan_enabled {
            let digest = artifact.image_digest.clone();
            let blocked = self
                .scan_backoff
                .retry(|| {
                    self.scans
                        .blocked_cve_counts(&digest, pipeline.environment_id, pipeline.app_id)
                })
                .await?;
            if !blocked.is_empty() {
                return Ok(FeasibilityOutcome::Blocked(BlockReason::Vulnerability {
                    digest: artifact.image_digest.clone(),
                }));
            }
        }

        if backend_kind.uses_gitops() {
            if let Some(config) = deployment_config {
                if config.requires_configured_repo() && !config.is_repo_configured() {
                    return Ok(FeasibilityOutcome::Blocked(
                        BlockReason::GitOpsNotConfigured {
                            app_name: pipeline.app_name.clone(),
                        },
                    ));
                }
            }
        }

        Ok(FeasibilityOutcome::Allowed)
    }

    /// CAS update of the deployment config repo url; one concurrent loser is
    /// tolerated (the winner wrote the same url).
    async fn persist_repo_url(
        &self,
        deployment_config: &Option<DeploymentConfig>,
        repo_url: &str,
    ) -> Result<(), TriggerError> {
        let Some(config) = deployment_config else {
            return Ok(());
        };
        let updated =
            DeploymentConfig::update_repo_url_cas(&self.pool, config.id, config.version, repo_url)
                .await?;
        if !updated {
            let fresh =
                DeploymentConfig::find_active(&self.pool, config.app_id, config.environment_id)
                    .await?;
            match fresh {
                Some(fresh) if fresh.is_repo_configured() => {
                    warn!(config_id = config.id, "repo url raced; keeping winner");
                }
                Some(fresh) => {
                    DeploymentConfig::update_repo_url_cas(
                        &self.pool,
                        fresh.id,
                        fresh.version,
                        repo_url,
                    )
                    .await?;
                }
                None => {
                    return Err(TriggerError::Precondition(
                        "deployment config vanished during repo provisioning".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Best-effort record of where the scanned image landed. `-1` marks an
    /// artifact with scanning disabled.
    pub(crate) async fn mark_image_scan_deployed(&self, pipeline: &Pipeline, artifact: &CiArtifact) {
        let history_id = if artifact.scan_enabled {
            match self
                .scans
                .latest_history_for_digest(&artifact.image_digest)
                .await
            {
                Ok(Some(history)) => history.id,
                Ok(None) => return,
                Err(err) => {
                    report_non_fatal("scan_history_lookup", &err);
                    return;
                }
            }
        } else {
            SCAN_DISABLED_HISTORY_ID
        };

        if let Err(err) = self
            .scans
            .mark_image_scan_deployed(
                history_id,
                pipeline.environment_id,
                pipeline.id,
                &artifact.image,
            )
            .await
        {
            report_non_fatal("scan_deploy_mapping", &err);
        }
    }

    /// Fire-and-forget CD success publication plus the in-process event and
    /// the trigger counter.
    async fn write_cd_trigger_event(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        environment: &Environment,
        runner_id: i64,
        release_no: i32,
        pipeline_override_id: i32,
        request: &DeployTriggerRequest,
    ) {
        self.metrics
            .inc_cd_trigger(&pipeline.app_name, &environment.name);

        let materials = artifact
            .parse_material_info()
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter_map(|(index, info)| {
                info.modifications.first().map(|m| PipelineMaterialCommit {
                    pipeline_material_id: index as i32 + 1,
                    commit_hash: m.revision.clone(),
                })
            })
            .collect();

        let event = DeploymentEvent {
            application_id: pipeline.app_id,
            environment_id: pipeline.environment_id,
            release_id: release_no,
            pipeline_override_id,
            ci_artifact_id: artifact.id,
            trigger_time: request.triggered_at,
            pipeline_materials: materials,
        };

        self.events.publish(LifecycleEvent::DeploymentTriggered {
            pipeline_id: pipeline.id,
            runner_id,
            event: event.clone(),
        });

        if let Some(writer) = &self.event_writer {
            let writer = Arc::clone(writer);
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(err) => {
                    report_non_fatal("event_encode", &err);
                    return;
                }
            };
            tokio::spawn(async move {
                if let Err(err) = writer.write(topics::CD_SUCCESS, payload).await {
                    report_non_fatal("cd_success_publish", &err);
                }
            });
        }
    }

    /// Load and validate the trigger's static context. Migrates deprecated
    /// artifact data sources on the way.
    pub(crate) async fn load_context(
        &self,
        request: &DeployTriggerRequest,
    ) -> Result<(Pipeline, CiArtifact, Environment, Cluster), TriggerError> {
        let pipeline = Pipeline::find_by_id(&self.pool, request.pipeline_id)
            .await?
            .ok_or_else(|| {
                TriggerError::Validation(format!("pipeline {} not found", request.pipeline_id))
            })?;
        let mut artifact = CiArtifact::find_by_id(&self.pool, request.artifact_id)
            .await?
            .ok_or_else(|| {
                TriggerError::Validation(format!("artifact {} not found", request.artifact_id))
            })?;
        if artifact.is_migration_required() {
            CiArtifact::migrate_to_webhook_data_source(&self.pool, artifact.id).await?;
            artifact.data_source = crate::models::artifact::data_source::WEBHOOK.to_string();
        }
        let environment = Environment::find_by_id(&self.pool, pipeline.environment_id)
            .await?
            .ok_or_else(|| {
                TriggerError::Validation(format!(
                    "environment {} not found",
                    pipeline.environment_id
                ))
            })?;
        let cluster = Cluster::find_by_id(&self.pool, environment.cluster_id)
            .await?
            .ok_or_else(|| {
                TriggerError::Validation(format!("cluster {} not found", environment.cluster_id))
            })?;
        Ok((pipeline, artifact, environment, cluster))
    }
}
