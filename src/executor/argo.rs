//! Argo Workflows executor. Renders a `Workflow` dynamic object whose steps
//! create the attached ConfigMaps/Secrets before the main stage container.

use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams, PostParams,
};
use serde_json::{Value, json};
use tracing::info;

use super::{
    ClusterRestConfig, ExecutorError, SubmittedWorkflow, WORKFLOW_ID_LABEL, WorkflowExecutor,
    WorkflowPhase, WorkflowTemplate, env_json, shared_volumes, workflow_labels,
};
use crate::state_machine::ExecutorKind;

const MAIN_TEMPLATE: &str = "cd-stages-with-env";
const RUN_TEMPLATE: &str = "run-stage";

#[derive(Debug, Default, Clone)]
pub struct ArgoWorkflowExecutor;

impl ArgoWorkflowExecutor {
    pub fn new() -> Self {
        Self
    }

    fn resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Workflow"))
    }

    async fn api(
        cluster: &ClusterRestConfig,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, ExecutorError> {
        let client = cluster.client().await?;
        Ok(Api::namespaced_with(client, namespace, &Self::resource()))
    }

    fn render(&self, template: &WorkflowTemplate) -> Value {
        let (volumes, mounts) = shared_volumes(template);
        let labels = workflow_labels(template.cd_workflow_id);

        let mut templates = Vec::new();
        let mut steps = Vec::new();

        for (index, cm) in template.config_maps.iter().enumerate() {
            let step_template = format!("create-cm-{index}");
            templates.push(json!({
                "name": step_template,
                "resource": {
                    "action": "create",
                    "setOwnerReference": true,
                    "manifest": serde_json::to_string(&json!({
                        "apiVersion": "v1",
                        "kind": "ConfigMap",
                        "metadata": { "name": cm.name, "labels": labels },
                        "data": cm.data
                    })).unwrap_or_default()
                }
            }));
            steps.push(json!([{ "name": step_template, "template": step_template }]));
        }
        for (index, secret) in template.secrets.iter().enumerate() {
            let step_template = format!("create-sec-{index}");
            templates.push(json!({
                "name": step_template,
                "resource": {
                    "action": "create",
                    "setOwnerReference": true,
                    "manifest": serde_json::to_string(&json!({
                        "apiVersion": "v1",
                        "kind": "Secret",
                        "metadata": { "name": secret.name, "labels": labels },
                        "stringData": secret.data
                    })).unwrap_or_default()
                }
            }));
            steps.push(json!([{ "name": step_template, "template": step_template }]));
        }
        steps.push(json!([{ "name": RUN_TEMPLATE, "template": RUN_TEMPLATE }]));

        templates.push(json!({
            "name": MAIN_TEMPLATE,
            "steps": steps
        }));
        templates.push(json!({
            "name": RUN_TEMPLATE,
            "container": {
                "name": "main",
                "image": template.image,
                "args": template.args,
                "env": env_json(&template.env),
                "volumeMounts": mounts
            },
            "activeDeadlineSeconds": template.active_deadline_seconds
        }));

        json!({
            "entrypoint": MAIN_TEMPLATE,
            "serviceAccountName": template.service_account_name,
            "nodeSelector": template.node_selector,
            "volumes": volumes,
            "ttlStrategy": {
                "secondsAfterCompletion": template.ttl_seconds_after_finished
            },
            "activeDeadlineSeconds": template.active_deadline_seconds,
            "podGC": { "strategy": "OnWorkflowCompletion" },
            "terminationGracePeriodSeconds": template.termination_grace_period_seconds,
            "templates": templates
        })
    }
}

#[async_trait::async_trait]
impl WorkflowExecutor for ArgoWorkflowExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Awf
    }

    async fn submit(
        &self,
        template: &WorkflowTemplate,
    ) -> Result<SubmittedWorkflow, ExecutorError> {
        let resource = Self::resource();
        let mut object = DynamicObject::new("", &resource);
        object.metadata.name = None;
        object.metadata.generate_name = Some(format!("{}-", template.workflow_name_prefix));
        object.metadata.namespace = Some(template.namespace.clone());
        object.metadata.labels = Some(workflow_labels(template.cd_workflow_id));
        object.data = json!({ "spec": self.render(template) });

        let api = Self::api(&template.cluster_config, &template.namespace).await?;
        let created = api
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| ExecutorError::Cluster(format!("workflow create: {e}")))?;
        let name = created.metadata.name.unwrap_or_default();

        info!(
            workflow = %name,
            namespace = %template.namespace,
            cd_workflow_id = template.cd_workflow_id,
            "Submitted argo workflow"
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
        let api = Self::api(cluster, namespace).await?;
        // Shutdown strategy rather than delete, so argo records the final
        // phase and pod GC still runs.
        api.patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(json!({ "spec": { "shutdown": "Terminate" } })),
        )
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
        let api = Self::api(cluster, namespace).await?;
        let selector = format!("{WORKFLOW_ID_LABEL}={cd_workflow_id}");
        api.delete_collection(
            &DeleteParams::default(),
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
        let api = Self::api(cluster, namespace).await?;
        let object = api
            .get(name)
            .await
            .map_err(|e| ExecutorError::from_kube(e, name, namespace))?;
        let phase = object.data["status"]["phase"].as_str().unwrap_or_default();
        Ok(match phase {
            "Pending" => WorkflowPhase::Pending,
            "Running" => WorkflowPhase::Running,
            "Succeeded" => WorkflowPhase::Succeeded,
            "Failed" | "Error" => WorkflowPhase::Failed,
            _ => WorkflowPhase::Unknown,
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
            workflow_name_prefix: "9-orders-pre".to_string(),
            namespace: "devtron-cd".to_string(),
            pipeline_name: "orders-pre".to_string(),
            cd_workflow_id: 42,
            runner_id: 9,
            stage: StageKind::Pre,
            image: "quay.io/devtron/ci-runner:latest".to_string(),
            args: vec!["run".to_string()],
            env: vec![("DOCKER_IMAGE".to_string(), "app:1".to_string())],
            service_account_name: "cd-runner".to_string(),
            active_deadline_seconds: 3600,
            ttl_seconds_after_finished: 3600,
            termination_grace_period_seconds: 180,
            node_selector: BTreeMap::new(),
            config_maps: vec![super::super::AttachedResource {
                name: "stage-cm".to_string(),
                mount_path: None,
                data: BTreeMap::from([("KEY".to_string(), "value".to_string())]),
            }],
            secrets: vec![],
            build_cache_pvc: None,
            cluster_config: ClusterRestConfig::in_cluster(),
        }
    }

    #[test]
    fn test_render_orders_resource_steps_before_main_container() {
        let spec = ArgoWorkflowExecutor::new().render(&template());
        assert_eq!(spec["entrypoint"], MAIN_TEMPLATE);

        let templates = spec["templates"].as_array().unwrap();
        let main = templates
            .iter()
            .find(|t| t["name"] == MAIN_TEMPLATE)
            .unwrap();
        let steps = main["steps"].as_array().unwrap();
        assert_eq!(steps[0][0]["template"], "create-cm-0");
        assert_eq!(steps.last().unwrap()[0]["template"], RUN_TEMPLATE);

        let run = templates.iter().find(|t| t["name"] == RUN_TEMPLATE).unwrap();
        assert_eq!(run["container"]["image"], "quay.io/devtron/ci-runner:latest");
        assert_eq!(run["activeDeadlineSeconds"], 3600);
    }

    #[test]
    fn test_render_attaches_cache_mounts_when_pvc_present() {
        let mut with_cache = template();
        with_cache.build_cache_pvc = Some("cache-orders".to_string());
        let spec = ArgoWorkflowExecutor::new().render(&with_cache);
        let volumes = spec["volumes"].as_array().unwrap();
        assert!(volumes.iter().any(|v| v["name"] == "build-cache"));
    }
}
