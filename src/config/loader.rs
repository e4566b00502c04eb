use config::{Config, Environment};

use super::DeployCoreConfig;
use crate::error::{DeployError, Result};

/// Load configuration from the process environment.
///
/// Variable names map to field names uppercased, e.g. `DEFAULT_NAMESPACE`,
/// `CD_WORKFLOW_EXECUTOR_TYPE`, `ENABLE_ASYNC_HELM_INSTALL_DEVTRON_CHART`.
/// Nested sections use a double-underscore separator (`ARGOCD__SERVER_URL`).
pub fn load_from_env() -> Result<DeployCoreConfig> {
    let raw = Config::builder()
        .add_source(
            Environment::default()
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        )
        .build()
        .map_err(|e| DeployError::ConfigurationError(e.to_string()))?;

    raw.try_deserialize()
        .map_err(|e| DeployError::ConfigurationError(e.to_string()))
}
