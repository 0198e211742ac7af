//! Custom Resource types consumed by the operator
//!
//! - ClusterCSIDriver: the operator's configuration and status object
//! - Infrastructure: cluster platform metadata (custom service endpoints)
//! - Apply configurations: owned-field partial views for server-side apply

pub mod apply;
pub mod cluster_csi_driver;
pub mod infrastructure;

pub use apply::*;
pub use cluster_csi_driver::*;
pub use infrastructure::*;
