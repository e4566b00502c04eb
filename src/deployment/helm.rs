//! Helm backend: talks to the helm controller over gRPC. Message types are
//! hand-written prost structs matching the controller's wire contract.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{BackendDeployOutcome, BackendDeployRequest, DeploymentBackend, DeploymentError};
use crate::models::ClusterGrpcConfig;
use crate::state_machine::DeploymentAppType;

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClusterConfig {
    #[prost(string, tag = "1")]
    pub api_server_url: String,
    #[prost(string, tag = "2")]
    pub token: String,
    #[prost(string, tag = "3")]
    pub cluster_name: String,
    #[prost(bool, tag = "4")]
    pub insecure_skip_tls_verify: bool,
    #[prost(string, tag = "5")]
    pub key_data: String,
    #[prost(string, tag = "6")]
    pub cert_data: String,
    #[prost(string, tag = "7")]
    pub ca_data: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReleaseIdentifier {
    #[prost(message, optional, tag = "1")]
    pub cluster_config: Option<ClusterConfig>,
    #[prost(string, tag = "2")]
    pub release_name: String,
    #[prost(string, tag = "3")]
    pub release_namespace: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct InstallReleaseRequest {
    #[prost(message, optional, tag = "1")]
    pub release_identifier: Option<ReleaseIdentifier>,
    #[prost(string, tag = "2")]
    pub chart_name: String,
    #[prost(string, tag = "3")]
    pub chart_version: String,
    #[prost(string, tag = "4")]
    pub values_yaml: String,
    #[prost(bytes = "vec", tag = "5")]
    pub chart_content: Vec<u8>,
    #[prost(int32, tag = "6")]
    pub history_max: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UpgradeReleaseRequest {
    #[prost(message, optional, tag = "1")]
    pub release_identifier: Option<ReleaseIdentifier>,
    #[prost(string, tag = "2")]
    pub values_yaml: String,
    #[prost(bytes = "vec", tag = "3")]
    pub chart_content: Vec<u8>,
    #[prost(string, tag = "4")]
    pub chart_name: String,
    #[prost(string, tag = "5")]
    pub chart_version: String,
    #[prost(int32, tag = "6")]
    pub history_max: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ReleaseResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: String,
}

/// Controller surface the backend needs; gRPC in production.
#[async_trait]
pub trait HelmClient: Send + Sync {
    async fn install_release_with_custom_chart(
        &self,
        request: InstallReleaseRequest,
    ) -> Result<ReleaseResponse, DeploymentError>;

    async fn upgrade_release(
        &self,
        request: UpgradeReleaseRequest,
    ) -> Result<ReleaseResponse, DeploymentError>;
}

pub struct GrpcHelmClient {
    grpc: tonic::client::Grpc<tonic::transport::Channel>,
}

impl GrpcHelmClient {
    pub async fn connect(url: &str) -> Result<Self, DeploymentError> {
        let channel = tonic::transport::Endpoint::from_shared(url.to_string())
            .map_err(|e| DeploymentError::Connection(e.to_string()))?
            .connect()
            .await
            .map_err(|e| DeploymentError::Connection(e.to_string()))?;
        Ok(Self {
            grpc: tonic::client::Grpc::new(channel),
        })
    }

    fn map_status(status: tonic::Status) -> DeploymentError {
        match status.code() {
            // Failed-precondition covers controller-side locks (another helm
            // operation in flight); the dispatcher retries it like an outage.
            tonic::Code::Unavailable
            | tonic::Code::DeadlineExceeded
            | tonic::Code::FailedPrecondition => {
                DeploymentError::Connection(status.message().to_string())
            }
            tonic::Code::Cancelled => DeploymentError::Cancelled,
            _ => DeploymentError::Failed(status.message().to_string()),
        }
    }

    async fn unary<Req, Resp>(
        &self,
        path: &'static str,
        request: Req,
    ) -> Result<Resp, DeploymentError>
    where
        Req: prost::Message + 'static,
        Resp: prost::Message + Default + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| DeploymentError::Connection(e.to_string()))?;
        let codec = tonic::codec::ProstCodec::default();
        let path = http::uri::PathAndQuery::from_static(path);
        grpc.unary(tonic::Request::new(request), path, codec)
            .await
            .map(tonic::Response::into_inner)
            .map_err(Self::map_status)
    }
}

#[async_trait]
impl HelmClient for GrpcHelmClient {
    async fn install_release_with_custom_chart(
        &self,
        request: InstallReleaseRequest,
    ) -> Result<ReleaseResponse, DeploymentError> {
        self.unary(
            "/client.ApplicationService/InstallReleaseWithCustomChart",
            request,
        )
        .await
    }

    async fn upgrade_release(
        &self,
        request: UpgradeReleaseRequest,
    ) -> Result<ReleaseResponse, DeploymentError> {
        self.unary("/client.ApplicationService/UpdateApplication", request)
            .await
    }
}

pub struct HelmBackend {
    client: Arc<dyn HelmClient>,
}

impl HelmBackend {
    pub fn new(client: Arc<dyn HelmClient>) -> Self {
        Self { client }
    }

    fn release_identifier(request: &BackendDeployRequest) -> ReleaseIdentifier {
        ReleaseIdentifier {
            cluster_config: Some(ClusterConfig::from(&request.cluster)),
            release_name: request.release_name.clone(),
            release_namespace: request.namespace.clone(),
        }
    }
}

#[async_trait]
impl DeploymentBackend for HelmBackend {
    fn kind(&self) -> DeploymentAppType {
        DeploymentAppType::Helm
    }

    async fn deploy(
        &self,
        request: &BackendDeployRequest,
    ) -> Result<BackendDeployOutcome, DeploymentError> {
        let identifier = Self::release_identifier(request);
        let chart_content = request.chart_content.clone().unwrap_or_default();

        let response = if request.deployment_app_created {
            self.client
                .upgrade_release(UpgradeReleaseRequest {
                    release_identifier: Some(identifier),
                    values_yaml: request.merged_values_yaml.clone(),
                    chart_content,
                    chart_name: request.chart_name.clone(),
                    chart_version: request.chart_version.clone(),
                    history_max: request.history_max,
                })
                .await?
        } else {
            self.client
                .install_release_with_custom_chart(InstallReleaseRequest {
                    release_identifier: Some(identifier),
                    chart_name: request.chart_name.clone(),
                    chart_version: request.chart_version.clone(),
                    values_yaml: request.merged_values_yaml.clone(),
                    chart_content,
                    history_max: request.history_max,
                })
                .await?
        };

        if !response.success {
            return Err(DeploymentError::Failed(response.message));
        }
        info!(
            release = %request.release_name,
            namespace = %request.namespace,
            upgraded = request.deployment_app_created,
            "helm release converged"
        );
        Ok(BackendDeployOutcome { app_created: true })
    }
}

/// Adapter for the [`ClusterGrpcConfig`] row type.
impl From<&ClusterGrpcConfig> for ClusterConfig {
    fn from(cluster: &ClusterGrpcConfig) -> Self {
        ClusterConfig {
            api_server_url: cluster.api_server_url.clone(),
            token: cluster.token.clone(),
            cluster_name: cluster.cluster_name.clone(),
            insecure_skip_tls_verify: cluster.insecure_skip_tls_verify,
            key_data: cluster.key_data.clone().unwrap_or_default(),
            cert_data: cluster.cert_data.clone().unwrap_or_default(),
            ca_data: cluster.ca_data.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::test_support::request;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeHelm {
        installs: Mutex<Vec<InstallReleaseRequest>>,
        upgrades: Mutex<Vec<UpgradeReleaseRequest>>,
        fail_with: Option<fn() -> DeploymentError>,
        report_failure: bool,
    }

    #[async_trait]
    impl HelmClient for FakeHelm {
        async fn install_release_with_custom_chart(
            &self,
            request: InstallReleaseRequest,
        ) -> Result<ReleaseResponse, DeploymentError> {
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            self.installs.lock().push(request);
            Ok(ReleaseResponse {
                success: !self.report_failure,
                message: if self.report_failure {
                    "install failed".to_string()
                } else {
                    String::new()
                },
            })
        }

        async fn upgrade_release(
            &self,
            request: UpgradeReleaseRequest,
        ) -> Result<ReleaseResponse, DeploymentError> {
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            self.upgrades.lock().push(request);
            Ok(ReleaseResponse {
                success: true,
                message: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn test_fresh_app_takes_install_path_with_cluster_secrets() {
        let helm = Arc::new(FakeHelm::default());
        let backend = HelmBackend::new(helm.clone());

        backend.deploy(&request(false)).await.unwrap();

        let installs = helm.installs.lock();
        assert_eq!(installs.len(), 1);
        assert!(helm.upgrades.lock().is_empty());
        let identifier = installs[0].release_identifier.as_ref().unwrap();
        assert_eq!(identifier.release_name, "orders-staging");
        let cluster = identifier.cluster_config.as_ref().unwrap();
        assert_eq!(cluster.token, "token");
        assert!(!cluster.insecure_skip_tls_verify);
    }

    #[tokio::test]
    async fn test_existing_app_takes_upgrade_path() {
        let helm = Arc::new(FakeHelm::default());
        let backend = HelmBackend::new(helm.clone());

        backend.deploy(&request(true)).await.unwrap();

        assert!(helm.installs.lock().is_empty());
        assert_eq!(helm.upgrades.lock().len(), 1);
        assert_eq!(helm.upgrades.lock()[0].history_max, 3);
    }

    #[tokio::test]
    async fn test_unsuccessful_install_maps_to_failed_error() {
        let helm = Arc::new(FakeHelm {
            report_failure: true,
            ..Default::default()
        });
        let backend = HelmBackend::new(helm);

        let err = backend.deploy(&request(false)).await.unwrap_err();
        assert!(matches!(err, DeploymentError::Failed(_)));
        assert!(err.persist_app_created());
    }

    #[test]
    fn test_grpc_status_classification() {
        for status in [
            tonic::Status::unavailable("dial tcp refused"),
            tonic::Status::deadline_exceeded("timed out"),
            tonic::Status::failed_precondition("another operation in progress"),
        ] {
            let err = GrpcHelmClient::map_status(status);
            assert!(matches!(err, DeploymentError::Connection(_)), "{err}");
            assert!(!err.persist_app_created());
        }

        let err = GrpcHelmClient::map_status(tonic::Status::cancelled("ctx done"));
        assert!(matches!(err, DeploymentError::Cancelled));

        let err = GrpcHelmClient::map_status(tonic::Status::invalid_argument("bad chart"));
        assert!(matches!(err, DeploymentError::Failed(_)));
    }

    #[tokio::test]
    async fn test_connection_error_does_not_persist_app_created() {
        let helm = Arc::new(FakeHelm {
            fail_with: Some(|| DeploymentError::Connection("dial tcp refused".to_string())),
            ..Default::default()
        });
        let backend = HelmBackend::new(helm);

        let err = backend.deploy(&request(false)).await.unwrap_err();
        assert!(!err.persist_app_created());
    }
}
