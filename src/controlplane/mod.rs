//! Control Plane Module
//!
//! Kubernetes-facing side of the operator: informer caches, manifest
//! rendering and apply, the ClusterCSIDriver client, and the orchestrator
//! that drives the workload controllers.

pub mod applier;
pub mod assets;
pub mod cache;
pub mod metrics;
pub mod operator_client;
pub mod orchestrator;
pub mod service;

pub use applier::*;
pub use assets::*;
pub use cache::*;
pub use metrics::*;
pub use operator_client::*;
pub use orchestrator::*;
pub use service::*;
