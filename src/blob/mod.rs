//! Blob storage reads: stage logs and produced artifacts, behind one
//! provider-agnostic store built on opendal.

use opendal::{services, Operator};
use tracing::{debug, instrument};

use crate::config::{BlobStorageConfig, DeployCoreConfig};
use crate::constants::layout;
use crate::error::{DeployError, Result};
use crate::resilience::Backoff;

/// Read-side access to the build-log and artifact keys, one bucket.
pub struct BlobStore {
    operator: Operator,
    log_key_prefix: String,
    artifact_key_prefix: String,
    backoff: Backoff,
}

impl BlobStore {
    pub fn new(config: &DeployCoreConfig) -> Result<Self> {
        let operator = create_operator(
            &config.blob_storage_provider,
            &config.default_build_logs_bucket,
            &config.blob_storage,
        )?;
        Ok(Self {
            operator,
            log_key_prefix: config.default_build_logs_key_prefix.clone(),
            artifact_key_prefix: config.default_artifact_key_prefix.clone(),
            backoff: Backoff::with_max_attempts(config.blob_storage_max_retries),
        })
    }

    /// Main log of a stage runner, at the fixed per-runner location.
    #[instrument(skip(self))]
    pub async fn get_logs(
        &self,
        cd_workflow_id: i64,
        workflow_type: &str,
        pipeline_name: &str,
    ) -> Result<Vec<u8>> {
        let key = layout::runner_log_location(
            &self.log_key_prefix,
            cd_workflow_id,
            workflow_type,
            pipeline_name,
        );
        debug!(%key, "reading stage logs");
        let buffer = self
            .backoff
            .retry(|| async { self.operator.read(&key).await })
            .await
            .map_err(|e| DeployError::StorageError(format!("log read {key}: {e}")))?;
        Ok(buffer.to_vec())
    }

    /// Artifact archive produced by a stage runner.
    #[instrument(skip(self))]
    pub async fn download_artifact(&self, cd_workflow_id: i64, runner_id: i64) -> Result<Vec<u8>> {
        let key = format!(
            "{}/{}",
            self.artifact_key_prefix,
            layout::artifact_key(cd_workflow_id, runner_id)
        );
        debug!(%key, "downloading stage artifact");
        let buffer = self
            .backoff
            .retry(|| async { self.operator.read(&key).await })
            .await
            .map_err(|e| DeployError::StorageError(format!("artifact read {key}: {e}")))?;
        Ok(buffer.to_vec())
    }
}

/// Operator for the configured provider. MINIO is S3 with a custom endpoint.
fn create_operator(
    provider: &str,
    bucket: &str,
    credentials: &BlobStorageConfig,
) -> Result<Operator> {
    match provider {
        "S3" | "MINIO" => {
            let mut builder = services::S3::default().bucket(bucket);
            if !credentials.region.is_empty() {
                builder = builder.region(&credentials.region);
            }
            if !credentials.endpoint.is_empty() {
                builder = builder.endpoint(&credentials.endpoint);
            }
            if !credentials.access_key.is_empty() {
                builder = builder.access_key_id(&credentials.access_key);
            }
            if !credentials.secret_key.is_empty() {
                builder = builder.secret_access_key(&credentials.secret_key);
            }
            Operator::new(builder)
                .map(|op| op.finish())
                .map_err(|e| DeployError::StorageError(e.to_string()))
        }
        "GCS" => {
            let builder = services::Gcs::default().bucket(bucket);
            Operator::new(builder)
                .map(|op| op.finish())
                .map_err(|e| DeployError::StorageError(e.to_string()))
        }
        "AZURE" => {
            let mut builder = services::Azblob::default().container(bucket);
            if !credentials.azure_account_name.is_empty() {
                builder = builder.account_name(&credentials.azure_account_name);
            }
            if !credentials.azure_account_key.is_empty() {
                builder = builder.account_key(&credentials.azure_account_key);
            }
            Operator::new(builder)
                .map(|op| op.finish())
                .map_err(|e| DeployError::StorageError(e.to_string()))
        }
        other => Err(DeployError::ConfigurationError(format!(
            "unknown blob storage provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = create_operator("FTP", "bucket", &BlobStorageConfig::default()).unwrap_err();
        assert!(err.to_string().contains("unknown blob storage provider"));
    }

    #[test]
    fn test_minio_is_s3_compatible() {
        let credentials = BlobStorageConfig {
            endpoint: "http://minio:9000".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            ..Default::default()
        };
        assert!(create_operator("MINIO", "devtron-ci-log", &credentials).is_ok());
    }
}
