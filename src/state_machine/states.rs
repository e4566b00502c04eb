use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of one stage attempt (a workflow runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerStatus {
    /// Pre/post runner created, workload not yet submitted
    Starting,
    /// Workload accepted by the executor but not scheduled
    Queued,
    /// Deploy runner created for a trigger
    Initiated,
    /// Workload or deployment underway
    InProgress,
    Succeeded,
    Failed,
    Aborted,
    Cancelled,
    TimedOut,
}

impl RunnerStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Aborted | Self::Cancelled | Self::TimedOut
        )
    }

    /// Non-terminal statuses that count against the one-active-runner rule.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses a runner may hold while its pod is alive. A plain cancel is
    /// refused in these states unless force-abort is requested.
    pub fn pod_may_be_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Queued | Self::InProgress)
    }

    pub fn all_active() -> &'static [RunnerStatus] {
        &[
            Self::Starting,
            Self::Queued,
            Self::Initiated,
            Self::InProgress,
        ]
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "Starting",
            Self::Queued => "Queued",
            Self::Initiated => "Initiated",
            Self::InProgress => "Progressing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Aborted => "Aborted",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TimedOut",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunnerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Starting" => Ok(Self::Starting),
            "Queued" => Ok(Self::Queued),
            "Initiated" => Ok(Self::Initiated),
            "Progressing" => Ok(Self::InProgress),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Aborted" => Ok(Self::Aborted),
            "CANCELLED" => Ok(Self::Cancelled),
            "TimedOut" => Ok(Self::TimedOut),
            _ => Err(format!("Invalid runner status: {s}")),
        }
    }
}

/// Stage of a deployment workflow. Normalizes the original's `stage` and
/// `workflow-type` fields into a single enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Pre,
    Deploy,
    Post,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pre => "PRE",
            Self::Deploy => "DEPLOY",
            Self::Post => "POST",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRE" => Ok(Self::Pre),
            "DEPLOY" => Ok(Self::Deploy),
            "POST" => Ok(Self::Post),
            _ => Err(format!("Invalid stage kind: {s}")),
        }
    }
}

/// What a deploy trigger asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    #[default]
    Deploy,
    Stop,
    Start,
    Rollback,
}

impl DeploymentType {
    /// Stop/start are hibernate requests; they never change the image.
    pub fn is_hibernate(&self) -> bool {
        matches!(self, Self::Stop | Self::Start)
    }

    /// The vulnerability gate runs only for plain deploys; hibernation and
    /// rollback re-apply an image that already passed it.
    pub fn skips_vulnerability_gate(&self) -> bool {
        self.is_hibernate() || matches!(self, Self::Rollback)
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deploy => "DEPLOY",
            Self::Stop => "STOP",
            Self::Start => "START",
            Self::Rollback => "ROLLBACK",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPLOY" => Ok(Self::Deploy),
            "STOP" => Ok(Self::Stop),
            "START" => Ok(Self::Start),
            "ROLLBACK" => Ok(Self::Rollback),
            _ => Err(format!("Invalid deployment type: {s}")),
        }
    }
}

/// Deployment backend kind of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentAppType {
    Argocd,
    Helm,
    ManifestDownload,
    Flux,
}

impl DeploymentAppType {
    pub fn is_argo(&self) -> bool {
        matches!(self, Self::Argocd)
    }

    pub fn is_helm(&self) -> bool {
        matches!(self, Self::Helm)
    }

    /// Backends that publish manifests through a Git repository.
    pub fn uses_gitops(&self) -> bool {
        matches!(self, Self::Argocd | Self::Flux)
    }
}

impl fmt::Display for DeploymentAppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Argocd => "argo_cd",
            Self::Helm => "helm",
            Self::ManifestDownload => "manifest_download",
            Self::Flux => "flux_cd",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DeploymentAppType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "argo_cd" => Ok(Self::Argocd),
            "helm" => Ok(Self::Helm),
            "manifest_download" => Ok(Self::ManifestDownload),
            "flux_cd" => Ok(Self::Flux),
            _ => Err(format!("Invalid deployment app type: {s}")),
        }
    }
}

/// Which executor submits pre/post stage workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ExecutorKind {
    /// Argo Workflow controller
    #[default]
    Awf,
    /// Native suspended Kubernetes Job
    System,
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Awf => "AWF",
            Self::System => "SYSTEM",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWF" => Ok(Self::Awf),
            "SYSTEM" => Ok(Self::System),
            _ => Err(format!("Invalid executor kind: {s}")),
        }
    }
}

impl Default for RunnerStatus {
    fn default() -> Self {
        Self::Starting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(RunnerStatus::Succeeded.is_terminal());
        assert!(RunnerStatus::Failed.is_terminal());
        assert!(RunnerStatus::Aborted.is_terminal());
        assert!(RunnerStatus::Cancelled.is_terminal());
        assert!(RunnerStatus::TimedOut.is_terminal());
        assert!(!RunnerStatus::Starting.is_terminal());
        assert!(!RunnerStatus::Queued.is_terminal());
        assert!(!RunnerStatus::Initiated.is_terminal());
        assert!(!RunnerStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            RunnerStatus::Starting,
            RunnerStatus::Queued,
            RunnerStatus::Initiated,
            RunnerStatus::InProgress,
            RunnerStatus::Succeeded,
            RunnerStatus::Failed,
            RunnerStatus::Aborted,
            RunnerStatus::Cancelled,
            RunnerStatus::TimedOut,
        ] {
            assert_eq!(status.to_string().parse::<RunnerStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_vulnerability_gate_exemptions() {
        assert!(!DeploymentType::Deploy.skips_vulnerability_gate());
        assert!(DeploymentType::Stop.skips_vulnerability_gate());
        assert!(DeploymentType::Start.skips_vulnerability_gate());
        assert!(DeploymentType::Rollback.skips_vulnerability_gate());
    }

    #[test]
    fn test_stage_kind_round_trip() {
        assert_eq!("PRE".parse::<StageKind>().unwrap(), StageKind::Pre);
        assert_eq!(StageKind::Deploy.to_string(), "DEPLOY");
        assert!("BUILD".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_backend_kind_helpers() {
        assert!(DeploymentAppType::Argocd.uses_gitops());
        assert!(DeploymentAppType::Flux.uses_gitops());
        assert!(!DeploymentAppType::Helm.uses_gitops());
        assert_eq!(
            "argo_cd".parse::<DeploymentAppType>().unwrap(),
            DeploymentAppType::Argocd
        );
    }
}
