//! Pre/post stage triggering: resolve the target namespace and cluster,
//! create the runner, build the workflow template, and submit via the
//! configured executor.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::errors::TriggerError;
use super::outcome::TriggerOutcome;
use super::service::{DeployTriggerRequest, TriggerService};
use crate::constants::{layout, plugins, pod_paths, stage_env};
use crate::error::DeployError;
use crate::events::LifecycleEvent;
use crate::executor::{AttachedResource, ClusterRestConfig, SubmittedWorkflow, WorkflowTemplate};
use crate::logging::report_non_fatal;
use crate::models::{AppLabel, CiArtifact, CiMaterialInfo, Cluster, DockerRegistry, Environment,
    ImagePathReservation, NewCdWorkflowRunner, Pipeline};
use crate::state_machine::{RunnerStatus, StageKind};

/// A pre or post stage trigger at the API boundary.
#[derive(Debug, Clone)]
pub struct StageTriggerRequest {
    pub pipeline_id: i32,
    pub artifact_id: i32,
    pub stage: StageKind,
    /// Post stages reuse the deploy's workflow; pre stages create one.
    pub cd_workflow_id: Option<i64>,
    pub triggered_by: i32,
}

/// Reference to the submitted stage workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTriggerOutcome {
    pub runner_id: i64,
    pub workflow_name: String,
    pub namespace: String,
}

/// Parsed stage configuration: plugin steps when present, legacy script
/// otherwise. Stored on the pipeline as JSON.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StageSpec {
    #[serde(default)]
    pub steps: Vec<StageStep>,
    #[serde(default)]
    pub config: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StageStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plugin_ref: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl StageSpec {
    pub fn parse(raw: Option<&str>) -> Result<StageSpec, TriggerError> {
        match raw {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
                .map_err(|e| TriggerError::Validation(format!("stage config: {e}"))),
            _ => Ok(StageSpec::default()),
        }
    }

    pub fn has_plugin_steps(&self) -> bool {
        !self.steps.is_empty()
    }

    fn copy_image_step(&self) -> Option<&StageStep> {
        self.steps
            .iter()
            .find(|s| s.plugin_ref.as_deref() == Some(plugins::COPY_CONTAINER_IMAGE))
    }
}

/// Destination images for the copy-container-image plugin. The input lists
/// `registry|repo1,repo2` groups separated by newlines; each repository gets
/// the current image tag appended.
pub(crate) fn copy_image_destinations(step: &StageStep, image_tag: &str) -> Vec<String> {
    let Some(info) = step.inputs.get("DESTINATION_INFO") else {
        return Vec::new();
    };
    let mut destinations = Vec::new();
    for line in info.lines() {
        let Some((registry, repos)) = line.split_once('|') else {
            continue;
        };
        for repo in repos.split(',') {
            let repo = repo.trim();
            if repo.is_empty() {
                continue;
            }
            destinations.push(format!("{}/{}:{}", registry.trim(), repo, image_tag));
        }
    }
    destinations
}

/// Distinct registry hosts named by the copy step's destinations.
pub(crate) fn destination_registry_hosts(step: &StageStep) -> Vec<String> {
    let Some(info) = step.inputs.get("DESTINATION_INFO") else {
        return Vec::new();
    };
    let mut hosts: Vec<String> = info
        .lines()
        .filter_map(|line| {
            line.split_once('|')
                .map(|(registry, _)| registry.trim().to_string())
        })
        .filter(|host| !host.is_empty())
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Push credentials for the destination registries, rendered as a
/// `.dockerconfigjson` secret the executor creates and mounts into the pod.
pub(crate) fn registry_credential_secret(
    name: &str,
    registries: &[DockerRegistry],
) -> Option<AttachedResource> {
    if registries.is_empty() {
        return None;
    }
    let mut auths = serde_json::Map::new();
    for registry in registries {
        let auth = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", registry.username, registry.password));
        auths.insert(
            registry.registry_url.clone(),
            serde_json::json!({
                "username": registry.username,
                "password": registry.password,
                "auth": auth,
            }),
        );
    }
    let mut data = BTreeMap::new();
    data.insert(
        ".dockerconfigjson".to_string(),
        serde_json::json!({ "auths": auths }).to_string(),
    );
    Some(AttachedResource {
        name: name.to_string(),
        mount_path: Some(pod_paths::REGISTRY_CREDENTIALS.to_string()),
        data,
    })
}

/// Tag portion of an image reference, used when no custom tag applies.
pub(crate) fn image_tag(image: &str) -> &str {
    image.rsplit_once(':').map(|(_, tag)| tag).unwrap_or("latest")
}

/// Numbered environment variables injected into the stage workload from the
/// artifact's git materials, app labels, and sibling environments.
pub(crate) fn stage_env_vars(
    materials: &[CiMaterialInfo],
    labels: &[AppLabel],
    child_envs: &[(String, String)],
    image: &str,
) -> Vec<(String, String)> {
    let mut env = Vec::with_capacity(materials.len() * 3 + labels.len() * 2 + child_envs.len() * 2 + 5);

    for (index, material) in materials.iter().enumerate() {
        let n = index + 1;
        if let Some(modification) = material.modifications.first() {
            env.push((
                format!("{}_{n}", stage_env::GIT_COMMIT_HASH),
                modification.revision.clone(),
            ));
        }
        env.push((
            format!("{}_{n}", stage_env::GIT_SOURCE_TYPE),
            material.material.source_type.clone(),
        ));
        env.push((
            format!("{}_{n}", stage_env::GIT_SOURCE_VALUE),
            material.material.value.clone(),
        ));
    }
    env.push((stage_env::GIT_SOURCE_COUNT.to_string(), materials.len().to_string()));

    for (index, label) in labels.iter().enumerate() {
        let n = index + 1;
        env.push((format!("{}_{n}", stage_env::APP_LABEL_KEY), label.key.clone()));
        env.push((format!("{}_{n}", stage_env::APP_LABEL_VALUE), label.value.clone()));
    }
    env.push((stage_env::APP_LABEL_COUNT.to_string(), labels.len().to_string()));

    for (index, (env_name, cluster_name)) in child_envs.iter().enumerate() {
        let n = index + 1;
        env.push((format!("{}_{n}", stage_env::CHILD_CD_ENV_NAME), env_name.clone()));
        env.push((
            format!("{}_{n}", stage_env::CHILD_CD_CLUSTER_NAME),
            cluster_name.clone(),
        ));
    }
    env.push((stage_env::CHILD_CD_COUNT.to_string(), child_envs.len().to_string()));

    env.push((stage_env::DOCKER_IMAGE.to_string(), image.to_string()));
    env
}

/// `key=value` selector entries parsed into a map; malformed entries are
/// dropped.
pub(crate) fn parse_node_selector(entries: &[String]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        })
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

fn map_reserve_error(err: DeployError) -> TriggerError {
    match err {
        DeployError::ValidationError(msg) => TriggerError::Validation(msg),
        other => TriggerError::Internal(other.to_string()),
    }
}

impl TriggerService {
    /// Trigger the pre-deployment stage of a pipeline.
    pub async fn trigger_pre_stage(
        &self,
        request: &StageTriggerRequest,
    ) -> Result<StageTriggerOutcome, TriggerError> {
        self.trigger_stage(request, StageKind::Pre).await
    }

    /// Trigger the post-deployment stage, reusing the deploy's workflow.
    pub async fn trigger_post_stage(
        &self,
        request: &StageTriggerRequest,
    ) -> Result<StageTriggerOutcome, TriggerError> {
        self.trigger_stage(request, StageKind::Post).await
    }

    /// Bulk re-trigger entry: route to the pre stage when one is configured
    /// and healthy, otherwise straight to the deploy path. Corrupt pre-stage
    /// rows (unparsable status) are deleted first.
    pub async fn trigger_stage_for_bulk(
        &self,
        pipeline_id: i32,
        artifact_id: i32,
        triggered_by: i32,
    ) -> Result<TriggerOutcome, TriggerError> {
        let pipeline = Pipeline::find_by_id(self.pool(), pipeline_id)
            .await?
            .ok_or_else(|| TriggerError::Validation(format!("pipeline {pipeline_id} not found")))?;

        let has_pre = pipeline
            .pre_stage_config
            .as_deref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        if !has_pre {
            return self.trigger_automatic_deployment(pipeline_id, artifact_id).await;
        }

        if let Some(runner) = self
            .store()
            .find_latest_by_pipeline_and_stage(pipeline_id, StageKind::Pre)
            .await?
        {
            if runner.runner_status().is_none() {
                info!(runner_id = runner.id, "deleting corrupt pre-stage runner");
                self.store().delete_runner(runner.id).await?;
            } else if !runner.is_terminal() {
                return Ok(TriggerOutcome::Skipped {
                    reason: "pre stage already running".to_string(),
                });
            }
        }

        let outcome = self
            .trigger_pre_stage(&StageTriggerRequest {
                pipeline_id,
                artifact_id,
                stage: StageKind::Pre,
                cd_workflow_id: None,
                triggered_by,
            })
            .await?;
        Ok(TriggerOutcome::Skipped {
            reason: format!("pre stage submitted as {}", outcome.workflow_name),
        })
    }

    #[instrument(skip(self, request), fields(pipeline_id = request.pipeline_id, stage = %stage))]
    async fn trigger_stage(
        &self,
        request: &StageTriggerRequest,
        stage: StageKind,
    ) -> Result<StageTriggerOutcome, TriggerError> {
        let deploy_request = DeployTriggerRequest {
            pipeline_id: request.pipeline_id,
            artifact_id: request.artifact_id,
            deployment_type: Default::default(),
            force_sync: false,
            triggered_by: request.triggered_by,
            author_name: String::new(),
            author_email: String::new(),
            triggered_at: chrono::Utc::now().naive_utc(),
        };
        let (pipeline, artifact, environment, cluster) = self.load_context(&deploy_request).await?;

        let (spec_raw, run_in_env) = match stage {
            StageKind::Pre => (pipeline.pre_stage_config.as_deref(), pipeline.run_pre_stage_in_env),
            StageKind::Post => (
                pipeline.post_stage_config.as_deref(),
                pipeline.run_post_stage_in_env,
            ),
            StageKind::Deploy => {
                return Err(TriggerError::Validation(
                    "deploy stage is not submitted through an executor".to_string(),
                ))
            }
        };
        let spec = StageSpec::parse(spec_raw)?;
        if spec.steps.is_empty() && spec.config.is_none() {
            return Err(TriggerError::Validation(format!(
                "pipeline {} has no {stage} stage configured",
                pipeline.id
            )));
        }

        let (namespace, cluster_config) = if run_in_env {
            (environment.namespace.clone(), external_cluster_config(&cluster))
        } else {
            (
                self.config().default_namespace.clone(),
                ClusterRestConfig::in_cluster(),
            )
        };

        let cd_workflow_id = match request.cd_workflow_id {
            Some(id) => id,
            None => {
                self.store()
                    .save_workflow(artifact.id as i64, pipeline.id, request.triggered_by)
                    .await?
                    .id
            }
        };

        let log_location = layout::runner_log_location(
            &self.config().default_build_logs_key_prefix,
            cd_workflow_id,
            &stage.to_string(),
            &pipeline.name,
        );
        let runner = self
            .store()
            .save_runner(&NewCdWorkflowRunner {
                name: pipeline.name.clone(),
                stage,
                executor_type: self.config().cd_workflow_executor_type.clone(),
                status: RunnerStatus::Starting,
                namespace: namespace.clone(),
                log_location: Some(log_location),
                blob_storage_enabled: self.config().blob_storage_enabled,
                cd_workflow_id,
                ref_cd_workflow_runner_id: None,
                reference_id: None,
                triggered_by: request.triggered_by,
            })
            .await?;

        let mut reservation_ids: Vec<i32> = Vec::new();
        if let Some(step) = spec.copy_image_step() {
            let custom_tag_id: i32 = step
                .inputs
                .get("CUSTOM_TAG_ID")
                .and_then(|v| v.parse().ok())
                .unwrap_or(artifact.id);
            let tag = image_tag(&artifact.image);
            for destination in copy_image_destinations(step, tag) {
                match ImagePathReservation::reserve(self.pool(), &destination, custom_tag_id).await
                {
                    Ok(reservation) => reservation_ids.push(reservation.id),
                    Err(err) => {
                        let mapped = map_reserve_error(err);
                        self.fail_stage_runner(runner.id, &mapped, request.triggered_by, &[])
                            .await;
                        return Err(mapped);
                    }
                }
            }
            if !reservation_ids.is_empty() {
                self.store()
                    .set_image_path_reservation_ids(runner.id, &reservation_ids)
                    .await?;
            }
        }

        let template = self
            .build_stage_template(&pipeline, &artifact, &environment, &spec, stage, runner.id, cd_workflow_id, &namespace, cluster_config, run_in_env)
            .await?;

        let executor = self
            .executor_for(self.config().executor_kind())
            .ok_or_else(|| TriggerError::Internal("no executor registered".to_string()))?;
        let submitted: SubmittedWorkflow = match executor.submit(&template).await {
            Ok(submitted) => submitted,
            Err(err) => {
                let mapped: TriggerError = err.into();
                self.fail_stage_runner(runner.id, &mapped, request.triggered_by, &reservation_ids)
                    .await;
                return Err(mapped);
            }
        };

        if let Err(err) = self
            .store()
            .set_pod_details(runner.id, &submitted.name, None)
            .await
        {
            report_non_fatal("runner_pod_details", &err);
        }
        self.events().publish(LifecycleEvent::StageTriggered {
            pipeline_id: pipeline.id,
            runner_id: runner.id,
            stage,
            workflow_name: submitted.name.clone(),
        });

        info!(
            runner_id = runner.id,
            workflow = %submitted.name,
            namespace = %submitted.namespace,
            "stage workload submitted"
        );
        Ok(StageTriggerOutcome {
            runner_id: runner.id,
            workflow_name: submitted.name,
            namespace: submitted.namespace,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn build_stage_template(
        &self,
        pipeline: &Pipeline,
        artifact: &CiArtifact,
        environment: &Environment,
        spec: &StageSpec,
        stage: StageKind,
        runner_id: i64,
        cd_workflow_id: i64,
        namespace: &str,
        cluster_config: ClusterRestConfig,
        run_in_env: bool,
    ) -> Result<WorkflowTemplate, TriggerError> {
        let materials = artifact
            .parse_material_info()
            .map_err(|e| TriggerError::Validation(format!("material info: {e}")))?;
        let labels = AppLabel::list_for_app(self.pool(), pipeline.app_id).await?;

        let mut child_envs: Vec<(String, String)> = Vec::new();
        for sibling in Pipeline::list_for_app(self.pool(), pipeline.app_id).await? {
            if sibling.id == pipeline.id {
                continue;
            }
            if let Some(env) = Environment::find_by_id(self.pool(), sibling.environment_id).await? {
                if let Some(cluster) = Cluster::find_by_id(self.pool(), env.cluster_id).await? {
                    child_envs.push((env.name, cluster.cluster_name));
                }
            }
        }

        let env = stage_env_vars(&materials, &labels, &child_envs, &artifact.image);

        let payload = serde_json::to_string(&spec)
            .map_err(|e| TriggerError::Internal(format!("stage payload: {e}")))?;

        let node_selector = if run_in_env {
            parse_node_selector(&self.config().external_cd_node_label_selector)
        } else {
            parse_node_selector(&self.config().cd_node_label_selector)
        };

        let build_cache_pvc = if labels
            .iter()
            .any(|l| l.key == crate::constants::PVC_CACHE_LABEL)
        {
            self.config().build_cache_pvc(&pipeline.name)
        } else {
            None
        };

        // Copy-image steps push to external registries; the pod needs their
        // credentials mounted as a docker config secret.
        let mut secrets = Vec::new();
        if let Some(step) = spec.copy_image_step() {
            let hosts = destination_registry_hosts(step);
            let registries = DockerRegistry::find_by_urls(self.pool(), &hosts).await?;
            if let Some(secret) =
                registry_credential_secret(&format!("registry-creds-{runner_id}"), &registries)
            {
                secrets.push(secret);
            }
        }

        Ok(WorkflowTemplate {
            workflow_name_prefix: format!("{}{}-{}", cd_workflow_id, stage, pipeline.name),
            namespace: namespace.to_string(),
            pipeline_name: pipeline.name.clone(),
            cd_workflow_id: cd_workflow_id as i32,
            runner_id: runner_id as i32,
            stage,
            image: self.config().cd_workflow_default_image.clone(),
            args: vec![payload],
            env,
            service_account_name: self.config().cd_workflow_service_account.clone(),
            active_deadline_seconds: self.config().default_timeout as i64,
            ttl_seconds_after_finished: self.config().build_log_ttl_value_in_secs as i32,
            termination_grace_period_seconds: self.config().termination_grace_period_secs,
            node_selector,
            config_maps: Vec::new(),
            secrets,
            build_cache_pvc,
            cluster_config,
        })
    }

    /// Mark the runner failed and release any image-path reservations it
    /// holds. Bookkeeping failures are reported, never surfaced.
    pub(crate) async fn fail_stage_runner(
        &self,
        runner_id: i64,
        error: &TriggerError,
        updated_by: i32,
        reservation_ids: &[i32],
    ) {
        if let Err(err) = self
            .store()
            .update_with_stage_transition(
                runner_id,
                RunnerStatus::Failed,
                Some(&error.to_string()),
                updated_by,
            )
            .await
        {
            report_non_fatal("runner_fail", &err);
        }
        if !reservation_ids.is_empty() {
            if let Err(err) = ImagePathReservation::deactivate(self.pool(), reservation_ids).await {
                report_non_fatal("reservation_release", &err);
            }
        }
    }
}

pub(crate) fn external_cluster_config(cluster: &Cluster) -> ClusterRestConfig {
    ClusterRestConfig {
        host: cluster.server_url.clone(),
        bearer_token: cluster.bearer_token.clone(),
        insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
        ca_data: if cluster.insecure_skip_tls_verify {
            None
        } else {
            cluster.ca_data.clone()
        },
    }
}
