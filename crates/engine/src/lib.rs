//! `engine` crate — deferred values, dependency graph validation, and the
//! plan executor at the core of the provisioning tool.

pub mod dag;
pub mod deferred;
pub mod deployment;
pub mod error;
pub mod executor;
pub mod exports;
pub mod graph;
pub mod manifest;
pub mod models;

pub use dag::{execution_waves, validate};
pub use deferred::Deferred;
pub use deployment::{Deployment, ResourceHandle};
pub use error::{EngineError, NodeFailure};
pub use executor::{
    ApplyReport, CancelToken, ExecutorConfig, NodeReport, NodeStatus, PlanExecutor, PlanStatus,
};
pub use exports::ExportStore;
pub use graph::DependencyGraph;
pub use manifest::Manifest;
pub use models::{FieldValue, ResourceNode};

#[cfg(test)]
mod executor_tests;
