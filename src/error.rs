use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DeployError {
    DatabaseError(String),
    StateTransitionError(String),
    TriggerError(String),
    ExecutorError(String),
    DeploymentError(String),
    GitOpsError(String),
    EventError(String),
    ValidationError(String),
    ConfigurationError(String),
    StorageError(String),
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            DeployError::StateTransitionError(msg) => write!(f, "State transition error: {msg}"),
            DeployError::TriggerError(msg) => write!(f, "Trigger error: {msg}"),
            DeployError::ExecutorError(msg) => write!(f, "Executor error: {msg}"),
            DeployError::DeploymentError(msg) => write!(f, "Deployment error: {msg}"),
            DeployError::GitOpsError(msg) => write!(f, "GitOps error: {msg}"),
            DeployError::EventError(msg) => write!(f, "Event error: {msg}"),
            DeployError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            DeployError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            DeployError::StorageError(msg) => write!(f, "Storage error: {msg}"),
        }
    }
}

impl std::error::Error for DeployError {}

impl From<sqlx::Error> for DeployError {
    fn from(err: sqlx::Error) -> Self {
        DeployError::DatabaseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
