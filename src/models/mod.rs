//! Persistence layer: row structs with `sqlx::FromRow`, statuses stored as
//! text and parsed on read, stores owning a `PgPool`.

pub mod artifact;
pub mod cd_workflow;
pub mod deployment_config;
pub mod deployment_history;
pub mod docker_registry;
pub mod environment;
pub mod image_path_reservation;
pub mod image_scan;
pub mod pipeline;
pub mod pipeline_override;
pub mod timeline;
pub mod user_deployment_request;

pub use artifact::{CiArtifact, CiMaterialInfo, MaterialRef, Modification};
pub use cd_workflow::{CdWorkflow, CdWorkflowRunner, CdWorkflowStore, NewCdWorkflowRunner};
pub use deployment_config::DeploymentConfig;
pub use deployment_history::{DeploymentTriggerHistory, NewDeploymentTriggerHistory};
pub use docker_registry::DockerRegistry;
pub use environment::{Cluster, ClusterGrpcConfig, Environment};
pub use image_path_reservation::ImagePathReservation;
pub use image_scan::{ImageScanStore, SCAN_DISABLED_HISTORY_ID};
pub use pipeline::{AppLabel, Pipeline};
pub use pipeline_override::{PipelineOverride, PipelineOverrideStore};
pub use timeline::{DbTimelineSink, NewTimeline, PipelineStatusTimeline, TimelineSink, TimelineStatus};
pub use user_deployment_request::{NewUserDeploymentRequest, UserDeploymentRequest};
