#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Deploy Core
//!
//! Rust core for Kubernetes-native continuous deployment triggering.
//!
//! ## Overview
//!
//! `deploy_core` owns the deployment trigger path of a CD orchestrator: it
//! accepts deploy requests for a pipeline (application x environment x
//! backend), runs the feasibility gates, publishes manifests to GitOps
//! repositories, converges releases through ArgoCD, Helm, or Flux, and
//! submits pre/post deployment stages as cluster workloads. Every stage
//! attempt is a workflow runner row with an append-only status timeline, so
//! retried and re-entered triggers are idempotent.
//!
//! ## Module Organization
//!
//! - [`models`] - Persistence layer: pipelines, artifacts, runners, timelines
//! - [`state_machine`] - Runner status transitions and stage/backend kinds
//! - [`trigger`] - The CD handler: deploy path, pre/post stages, cancel
//! - [`executor`] - Stage workload submission (Argo Workflows, system Jobs)
//! - [`gitops`] - Chart and values publication to GitOps repositories
//! - [`deployment`] - ArgoCD / Helm / Flux deployment backends
//! - [`dispatcher`] - Durable async dispatch over NATS JetStream
//! - [`events`] - In-process broadcast and CD success publication
//! - [`blob`] - Stage log and artifact retrieval
//! - [`config`] - Frozen environment-sourced configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use deploy_core::config::DeployCoreConfig;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeployCoreConfig::default();
//! println!("deploy core targets namespace {}", config.default_namespace);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! All outbound clients (cluster API, git, gRPC, HTTP, NATS) sit behind
//! traits with recording fakes, so the test suite runs without a live
//! database, cluster, or broker:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests
//! ```

pub mod blob;
pub mod config;
pub mod constants;
pub mod database;
pub mod deployment;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod gitops;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod state_machine;
pub mod trigger;

pub use config::DeployCoreConfig;
pub use error::{DeployError, Result};
pub use state_machine::{DeploymentAppType, DeploymentType, ExecutorKind, RunnerStatus, StageKind};
pub use trigger::{
    DeployTriggerRequest, StageTriggerRequest, TriggerError, TriggerOutcome, TriggerService,
};
