//! PowerVS Block CSI Driver Operator
//!
//! A Kubernetes operator that deploys the IBM Power VS block CSI driver and
//! keeps its controller Deployment and node DaemonSet in sync with cluster
//! state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                 ClusterCSIDriver controller                       │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────────┐   ┌──────────────────┐  │
//! │  │   Asset      │──▶│  Hook pipeline   │──▶│  Server-side     │  │
//! │  │   renderer   │   │  (per workload)  │   │  apply           │  │
//! │  └──────────────┘   └────────┬─────────┘   └──────────────────┘  │
//! │                              │ listers                            │
//! │                   ┌──────────┴──────────┐                         │
//! │                   │  Reflector caches   │                         │
//! │                   └─────────────────────┘                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  State bridge: DynamicObject ─▶ ClusterCSIDriver ─▶ owned fields │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`hooks`]: Manifest hooks and the hook pipeline
//! - [`bridge`]: Typed conversion and owned-field extraction
//! - [`controlplane`]: Caches, rendering, apply and the orchestrator
//! - [`crd`]: ClusterCSIDriver, Infrastructure and apply configurations
//! - [`domain`]: Core traits
//! - [`error`]: Error types and handling

pub mod bridge;
pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;
pub mod hooks;

// Re-export commonly used types
pub use controlplane::{
    AssetRenderer, ImageConfig, KubeApplier, OperatorClient, OperatorConfig, OperatorMetrics,
    Orchestrator, WorkloadController,
};

pub use crd::{
    ClusterCSIDriver, ClusterCSIDriverSpec, Infrastructure, LogLevel, ManagementState,
    OperatorSpec, OperatorStatus, POWERVS_BLOCK_CSI_DRIVER,
};

pub use domain::ports::{ManifestApplier, ObjectLister, Workload};

pub use bridge::{extract_operator_spec, extract_operator_status, to_cluster_csi_driver};

pub use hooks::{EndpointMapper, HookPipeline, ManifestHook};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
