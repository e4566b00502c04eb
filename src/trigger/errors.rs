//! Trigger error taxonomy with its HTTP surface.

use crate::deployment::DeploymentError;
use crate::executor::ExecutorError;
use crate::gitops::GitOpsError;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// Malformed or impossible request (bad pipeline, missing artifact,
    /// terminate target not found).
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthenticated: {0}")]
    Auth(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Image blocked by the vulnerability policy.
    #[error("found vulnerability for image digest {digest}")]
    Vulnerability { digest: String },
    /// Custom GitOps required but the repository is not configured.
    #[error("gitops repository is not configured for app {app_name}")]
    GitOpsNotConfigured { app_name: String },
    /// State no longer admits the operation (stale config version, runner
    /// already terminal).
    #[error("precondition failed: {0}")]
    Precondition(String),
    /// Backend unreachable; the async dispatcher retries these.
    #[error("backend transient failure: {0}")]
    BackendTransient(String),
    #[error("backend permanent failure: {0}")]
    BackendPermanent(String),
    /// A newer trigger cancelled this one mid-flight.
    #[error("deployment superseded")]
    Superseded,
    #[error("internal error: {0}")]
    Internal(String),
}

impl TriggerError {
    pub fn http_status(&self) -> u16 {
        match self {
            TriggerError::Validation(_) => 400,
            TriggerError::Auth(_) => 401,
            TriggerError::Forbidden(_) | TriggerError::Vulnerability { .. } => 403,
            TriggerError::GitOpsNotConfigured { .. } | TriggerError::Superseded => 409,
            TriggerError::Precondition(_) => 412,
            TriggerError::BackendTransient(_)
            | TriggerError::BackendPermanent(_)
            | TriggerError::Internal(_) => 500,
        }
    }

    /// Only transient backend failures are retried, and only by the async
    /// dispatcher.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TriggerError::BackendTransient(_))
    }
}

impl From<super::outcome::BlockReason> for TriggerError {
    fn from(reason: super::outcome::BlockReason) -> Self {
        match reason {
            super::outcome::BlockReason::Vulnerability { digest } => {
                TriggerError::Vulnerability { digest }
            }
            super::outcome::BlockReason::GitOpsNotConfigured { app_name } => {
                TriggerError::GitOpsNotConfigured { app_name }
            }
        }
    }
}

impl From<sqlx::Error> for TriggerError {
    fn from(err: sqlx::Error) -> Self {
        TriggerError::Internal(format!("database error: {err}"))
    }
}

impl From<DeploymentError> for TriggerError {
    fn from(err: DeploymentError) -> Self {
        match err {
            DeploymentError::Connection(msg) => TriggerError::BackendTransient(msg),
            DeploymentError::Failed(msg) => TriggerError::BackendPermanent(msg),
            DeploymentError::Cancelled => TriggerError::Superseded,
        }
    }
}

impl From<GitOpsError> for TriggerError {
    fn from(err: GitOpsError) -> Self {
        TriggerError::BackendPermanent(err.to_string())
    }
}

impl From<ExecutorError> for TriggerError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::NotFound { .. } => TriggerError::Validation(err.to_string()),
            other => TriggerError::BackendPermanent(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(TriggerError::Validation("x".to_string()).http_status(), 400);
        assert_eq!(TriggerError::Auth("x".to_string()).http_status(), 401);
        assert_eq!(
            TriggerError::Vulnerability {
                digest: "sha256:d".to_string()
            }
            .http_status(),
            403
        );
        assert_eq!(
            TriggerError::GitOpsNotConfigured {
                app_name: "orders".to_string()
            }
            .http_status(),
            409
        );
        assert_eq!(
            TriggerError::Precondition("stale".to_string()).http_status(),
            412
        );
        assert_eq!(
            TriggerError::BackendTransient("down".to_string()).http_status(),
            500
        );
    }

    #[test]
    fn test_only_transient_backend_errors_retry() {
        assert!(TriggerError::BackendTransient("x".to_string()).is_retryable());
        assert!(!TriggerError::BackendPermanent("x".to_string()).is_retryable());
        assert!(!TriggerError::Superseded.is_retryable());
    }

    #[test]
    fn test_cancelled_backend_maps_to_superseded() {
        let err: TriggerError = DeploymentError::Cancelled.into();
        assert!(matches!(err, TriggerError::Superseded));
    }

    #[test]
    fn test_vulnerability_message_carries_digest() {
        let err = TriggerError::Vulnerability {
            digest: "sha256:deadbeef".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "found vulnerability for image digest sha256:deadbeef"
        );
    }
}
