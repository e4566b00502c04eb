//! Shared constants: lifecycle messages, storage layouts, and system defaults.
//!
//! Timeline status tags and runner statuses live in [`crate::state_machine`];
//! everything here is plain data shared across components.

/// Messages persisted on runners and surfaced to callers.
pub mod messages {
    /// Written on a runner that lost to a newer trigger on the same pipeline.
    pub const NEW_DEPLOYMENT_INITIATED: &str =
        "A new deployment was initiated before this deployment completed!";

    /// Written on a runner blocked by the vulnerability gate.
    pub const FOUND_VULNERABILITY: &str = "Found vulnerability on image";

    /// Written on a runner blocked by missing custom GitOps repository.
    pub const GITOPS_REPO_NOT_CONFIGURED: &str =
        "GitOps repository is not configured for the app";

    /// Written on a pre/post runner that tried to claim an image path
    /// already bound to a different artifact.
    pub const IMAGE_PATH_ALREADY_IN_USE: &str = "image path already in use";
}

/// Sentinels recognized in persisted configuration.
pub mod sentinels {
    /// Deployment Config repo url meaning "no GitOps repository yet".
    pub const GITOPS_REPO_NOT_CONFIGURED: &str = "NOT_CONFIGURED";
}

/// System actors for audit columns.
pub mod system {
    /// User id recorded for automatic (non-interactive) triggers.
    pub const SYSTEM_USER_ID: i32 = 1;
}

/// Persisted-state layout rules (log and artifact locations, values files).
pub mod layout {
    /// Log location of a stage runner inside the build-logs bucket.
    pub fn runner_log_location(
        prefix: &str,
        cd_workflow_id: i64,
        workflow_type: &str,
        pipeline_name: &str,
    ) -> String {
        format!("{prefix}/{cd_workflow_id}{workflow_type}-{pipeline_name}/main.log")
    }

    /// Default artifact key inside the artifact bucket: `%d/%d.zip`.
    pub fn artifact_key(cd_workflow_id: i64, runner_id: i64) -> String {
        format!("{cd_workflow_id}/{runner_id}.zip")
    }

    /// Values file committed per environment to the GitOps repository.
    pub fn env_values_file(env_id: i32) -> String {
        format!("_{env_id}-values.yaml")
    }

    /// Deterministic GitOps repository name derived from the app name.
    pub fn gitops_repo_name(app_name: &str) -> String {
        let slug: String = app_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}-gitops", slug.trim_matches('-'))
    }
}

/// Environment variables injected into pre/post stage workflows.
pub mod stage_env {
    pub const GIT_COMMIT_HASH: &str = "GIT_COMMIT_HASH";
    pub const GIT_SOURCE_TYPE: &str = "GIT_SOURCE_TYPE";
    pub const GIT_SOURCE_VALUE: &str = "GIT_SOURCE_VALUE";
    pub const GIT_SOURCE_COUNT: &str = "GIT_SOURCE_COUNT";
    pub const APP_LABEL_KEY: &str = "APP_LABEL_KEY";
    pub const APP_LABEL_VALUE: &str = "APP_LABEL_VALUE";
    pub const APP_LABEL_COUNT: &str = "APP_LABEL_COUNT";
    pub const CHILD_CD_ENV_NAME: &str = "CHILD_CD_ENV_NAME";
    pub const CHILD_CD_CLUSTER_NAME: &str = "CHILD_CD_CLUSTER_NAME";
    pub const CHILD_CD_COUNT: &str = "CHILD_CD_COUNT";
    pub const DOCKER_IMAGE: &str = "DOCKER_IMAGE";
    pub const DEPLOYMENT_RELEASE_ID: &str = "DEPLOYMENT_RELEASE_ID";
}

/// Plugin identifiers recognized by the stage trigger.
pub mod plugins {
    pub const COPY_CONTAINER_IMAGE: &str = "COPY_CONTAINER_IMAGE";
}

/// NATS topics the core publishes to.
pub mod topics {
    pub const CD_SUCCESS: &str = "CD.TRIGGER";
}

/// Fixed paths inside stage workload pods.
pub mod pod_paths {
    /// Downward-API mount exposing pod labels and annotations.
    pub const DOWNWARD_API: &str = "/devtroncd/pod-meta";

    /// Push-credential secret mount for copy-image stages.
    pub const REGISTRY_CREDENTIALS: &str = "/devtroncd/registry-creds";

    /// Build-cache mounts used when the app carries the PVC cache label.
    pub const CACHE_ROOT: &str = "/var/lib/docker";
    pub const CACHE_BUILD: &str = "/devtroncd-cache";
    pub const CACHE_OCI: &str = "/oci-cache";
}

/// App label that opts a pipeline into PVC-backed build caching.
pub const PVC_CACHE_LABEL: &str = "devtron.ai/ci-pvc";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_location_matches_layout_rule() {
        let loc = layout::runner_log_location("devtron/cd-logs", 42, "PRE", "p1");
        assert_eq!(loc, "devtron/cd-logs/42PRE-p1/main.log");
    }

    #[test]
    fn artifact_key_is_workflow_then_runner() {
        assert_eq!(layout::artifact_key(7, 9), "7/9.zip");
    }

    #[test]
    fn env_values_file_embeds_env_id() {
        assert_eq!(layout::env_values_file(3), "_3-values.yaml");
    }

    #[test]
    fn gitops_repo_name_is_deterministic_slug() {
        assert_eq!(layout::gitops_repo_name("My App_1"), "my-app-1-gitops");
        assert_eq!(layout::gitops_repo_name("orders"), "orders-gitops");
    }
}
