//! System executor: runs the stage as a plain Job. Created suspended so the
//! owned ConfigMaps/Secrets exist before any pod starts, then unsuspended.

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde_json::json;
use tracing::info;

use super::{
    ClusterRestConfig, ExecutorError, SubmittedWorkflow, WORKFLOW_ID_LABEL, WorkflowExecutor,
    WorkflowPhase, WorkflowTemplate, env_json, shared_volumes, workflow_labels,
};
use crate::state_machine::ExecutorKind;

#[derive(Debug, Default, Clone)]
pub struct SystemJobExecutor;

impl SystemJobExecutor {
    pub fn new() -> Self {
        Self
    }

    fn render(&self, template: &WorkflowTemplate) -> Result<Job, ExecutorError> {
        let (volumes, mounts) = shared_volumes(template);
        serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "generateName": format!("{}-", template.workflow_name_prefix),
                "namespace": template.namespace,
                "labels": workflow_labels(template.cd_workflow_id)
            },
            "spec": {
                "suspend": true,
                "backoffLimit": 0,
                "activeDeadlineSeconds": template.active_deadline_seconds,
                "ttlSecondsAfterFinished": template.ttl_seconds_after_finished,
                "template": {
                    "metadata": { "labels": workflow_labels(template.cd_workflow_id) },
                    "spec": {
                        "restartPolicy": "Never",
                        "serviceAccountName": template.service_account_name,
                        "terminationGracePeriodSeconds": template.termination_grace_period_seconds,
                        "nodeSelector": template.node_selector,
                        "volumes": volumes,
                        "containers": [{
                            "name": "main",
                            "image": template.image,
                            "args": template.args,
                            "env": env_json(&template.env),
                            "volumeMounts": mounts
                        }]
                    }
                }
            }
        }))
        .map_err(|e| ExecutorError::Render(format!("job render: {e}")))
    }

    fn owner_reference(job: &Job) -> OwnerReference {
        OwnerReference {
            api_version: "batch/v1".to_string(),
            kind: "Job".to_string(),
            name: job.metadata.name.clone().unwrap_or_default(),
            uid: job.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// ConfigMaps and Secrets are owned by the job so foreground deletion
    /// sweeps them with it.
    async fn create_owned_resources(
        &self,
        client: &kube::Client,
        template: &WorkflowTemplate,
        job: &Job,
    ) -> Result<(), ExecutorError> {
        let owner = Self::owner_reference(job);
        let labels = workflow_labels(template.cd_workflow_id);

        let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &template.namespace);
        for attached in &template.config_maps {
            let cm: ConfigMap = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {
                    "name": attached.name,
                    "labels": labels,
                    "ownerReferences": [owner]
                },
                "data": attached.data
            }))
            .map_err(|e| ExecutorError::Render(format!("configmap render: {e}")))?;
            config_maps
                .create(&PostParams::default(), &cm)
                .await
                .map_err(|e| ExecutorError::Cluster(format!("configmap create: {e}")))?;
        }

        let secrets: Api<Secret> = Api::namespaced(client.clone(), &template.namespace);
        for attached in &template.secrets {
            let secret: Secret = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {
                    "name": attached.name,
                    "labels": labels,
                    "ownerReferences": [owner]
                },
                "stringData": attached.data
            }))
            .map_err(|e| ExecutorError::Render(format!("secret render: {e}")))?;
            secrets
                .create(&PostParams::default(), &secret)
                .await
                .map_err(|e| ExecutorError::Cluster(format!("secret create: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkflowExecutor for SystemJobExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::System
    }

    async fn submit(
        &self,
        template: &WorkflowTemplate,
    ) -> Result<SubmittedWorkflow, ExecutorError> {
        let client = template.cluster_config.client().await?;
        let jobs: Api<Job> = Api::namespaced(client.clone(), &template.namespace);

        let rendered = self.render(template)?;
        let created = jobs
            .create(&PostParams::default(), &rendered)
            .await
            .map_err(|e| ExecutorError::Cluster(format!("job create: {e}")))?;
        let name = created.metadata.name.clone().unwrap_or_default();

        self.create_owned_resources(&client, template, &created)
            .await?;

        jobs.patch(
            &name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "spec": { "suspend": false } })),
        )
        .await
        .map_err(|e| ExecutorError::Cluster(format!("job unsuspend: {e}")))?;

        info!(
            job = %name,
            namespace = %template.namespace,
            cd_workflow_id = template.cd_workflow_id,
            "Submitted stage job"
        );
        Ok(SubmittedWorkflow {
            name,
            namespace: template.namespace.clone(),
        })
    }

    async fn terminate(
        &self,
        cluster: &ClusterRestConfig,
        name: &str,
        namespace: &str,
    ) -> Result<(), ExecutorError> {
        let client = cluster.client().await?;
        let jobs: Api<Job> = Api::namespaced(client, namespace);
        jobs.delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| ExecutorError::from_kube(e, name, namespace))?;
        Ok(())
    }

    async fn terminate_dangling(
        &self,
        cluster: &ClusterRestConfig,
        cd_workflow_id: i32,
        namespace: &str,
    ) -> Result<(), ExecutorError> {
        let client = cluster.client().await?;
        let jobs: Api<Job> = Api::namespaced(client, namespace);
        let selector = format!("{WORKFLOW_ID_LABEL}={cd_workflow_id}");
        jobs.delete_collection(
            &DeleteParams::foreground(),
            &ListParams::default().labels(&selector),
        )
        .await
        .map_err(|e| ExecutorError::Cluster(format!("dangling delete: {e}")))?;
        Ok(())
    }

    async fn get_status(
        &self,
        cluster: &ClusterRestConfig,
        name: &str,
        namespace: &str,
    ) -> Result<WorkflowPhase, ExecutorError> {
        let client = cluster.client().await?;
        let jobs: Api<Job> = Api::namespaced(client, namespace);
        let job = jobs
            .get(name)
            .await
            .map_err(|e| ExecutorError::from_kube(e, name, namespace))?;
        let status = job.status.unwrap_or_default();
        Ok(if status.succeeded.unwrap_or(0) > 0 {
            WorkflowPhase::Succeeded
        } else if status.failed.unwrap_or(0) > 0 {
            WorkflowPhase::Failed
        } else if status.active.unwrap_or(0) > 0 {
            WorkflowPhase::Running
        } else {
            WorkflowPhase::Pending
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::StageKind;
    use std::collections::BTreeMap;

    fn template() -> WorkflowTemplate {
        WorkflowTemplate {
            workflow_name_prefix: "9-orders-post".to_string(),
            namespace: "devtron-cd".to_string(),
            pipeline_name: "orders-post".to_string(),
            cd_workflow_id: 42,
            runner_id: 9,
            stage: StageKind::Post,
            image: "quay.io/devtron/ci-runner:latest".to_string(),
            args: vec![],
            env: vec![],
            service_account_name: "cd-runner".to_string(),
            active_deadline_seconds: 3600,
            ttl_seconds_after_finished: 3600,
            termination_grace_period_seconds: 180,
            node_selector: BTreeMap::new(),
            config_maps: vec![],
            secrets: vec![],
            build_cache_pvc: None,
            cluster_config: ClusterRestConfig::in_cluster(),
        }
    }

    #[test]
    fn test_render_creates_suspended_job_without_retries() {
        let job = SystemJobExecutor::new().render(&template()).unwrap();
        let spec = job.spec.unwrap();
        assert_eq!(spec.suspend, Some(true));
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(3600));
        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod_spec.termination_grace_period_seconds, Some(180));
    }

    #[test]
    fn test_labels_carry_workflow_id() {
        let job = SystemJobExecutor::new().render(&template()).unwrap();
        let labels = job.metadata.labels.unwrap();
        assert_eq!(labels.get(WORKFLOW_ID_LABEL).map(String::as_str), Some("42"));
    }
}
