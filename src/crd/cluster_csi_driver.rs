//! ClusterCSIDriver CRD
//!
//! The operator's own configuration object (`operator.openshift.io/v1`).
//! The spec embeds the generic operator spec shared by all OpenShift
//! operators; the status embeds the generic operator status.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the ClusterCSIDriver instance owned by this operator
pub const POWERVS_BLOCK_CSI_DRIVER: &str = "powervs.csi.ibm.com";

// =============================================================================
// ClusterCSIDriver CRD
// =============================================================================

/// ClusterCSIDriver configures a CSI driver operand managed by an operator.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openshift.io",
    version = "v1",
    kind = "ClusterCSIDriver",
    plural = "clustercsidrivers",
    status = "ClusterCSIDriverStatus",
    printcolumn = r#"{"name": "Management", "type": "string", "jsonPath": ".spec.managementState"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverSpec {
    #[serde(flatten)]
    pub operator_spec: OperatorSpec,

    /// Driver specific configuration, opaque to this operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_config: Option<serde_json::Value>,

    /// Whether the operator manages the default storage classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_state: Option<String>,
}

/// Status of the ClusterCSIDriver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverStatus {
    #[serde(flatten)]
    pub operator_status: OperatorStatus,
}

// =============================================================================
// Generic Operator Spec
// =============================================================================

/// Spec fields common to every OpenShift operator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpec {
    /// Whether and how the operator should manage the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_state: Option<ManagementState>,

    /// Verbosity of the operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Verbosity of the operator itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<LogLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_config_overrides: Option<serde_json::Value>,

    /// Configuration observed by config observers (proxy settings live here)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_config: Option<serde_json::Value>,
}

impl OperatorSpec {
    /// Effective management state, `Managed` when unset
    pub fn management_state(&self) -> ManagementState {
        self.management_state.unwrap_or_default()
    }

    /// Effective operand log level, `Normal` when unset
    pub fn log_level(&self) -> LogLevel {
        self.log_level.unwrap_or_default()
    }
}

/// How the operator treats its operand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ManagementState {
    #[default]
    Managed,
    Unmanaged,
    Removed,
    Force,
}

impl std::fmt::Display for ManagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagementState::Managed => write!(f, "Managed"),
            ManagementState::Unmanaged => write!(f, "Unmanaged"),
            ManagementState::Removed => write!(f, "Removed"),
            ManagementState::Force => write!(f, "Force"),
        }
    }
}

/// Operand log verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LogLevel {
    #[default]
    Normal,
    Debug,
    Trace,
    TraceAll,
}

impl LogLevel {
    /// klog `-v` value passed to the driver containers
    pub fn verbosity(&self) -> u8 {
        match self {
            LogLevel::Normal => 2,
            LogLevel::Debug => 4,
            LogLevel::Trace => 6,
            LogLevel::TraceAll => 8,
        }
    }
}

// =============================================================================
// Generic Operator Status
// =============================================================================

/// Status fields common to every OpenShift operator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<OperatorCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_available_revision: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generations: Vec<GenerationStatus>,
}

/// A single operator condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Generation of a workload last applied by the operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub group: String,
    pub resource: String,
    pub namespace: String,
    pub name: String,
    pub last_generation: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}
