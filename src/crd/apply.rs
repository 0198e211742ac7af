//! Apply configurations
//!
//! Partial, all-optional views of the ClusterCSIDriver spec and status used
//! with server-side apply. A field left as `None` is a field the caller does
//! not claim ownership of.

use super::cluster_csi_driver::{ConditionStatus, LogLevel, ManagementState, OperatorCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};

// =============================================================================
// Spec
// =============================================================================

/// Partial ClusterCSIDriver spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverSpecApplyConfiguration {
    #[serde(flatten)]
    pub operator_spec: OperatorSpecApplyConfiguration,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_config: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_state: Option<String>,
}

/// Partial generic operator spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorSpecApplyConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_state: Option<ManagementState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator_log_level: Option<LogLevel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_config_overrides: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_config: Option<serde_json::Value>,
}

// =============================================================================
// Status
// =============================================================================

/// Partial ClusterCSIDriver status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCSIDriverStatusApplyConfiguration {
    #[serde(flatten)]
    pub operator_status: OperatorStatusApplyConfiguration,
}

/// Partial generic operator status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatusApplyConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<OperatorConditionApplyConfiguration>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_available_revision: Option<i32>,
}

impl OperatorStatusApplyConfiguration {
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    pub fn with_ready_replicas(mut self, replicas: i32) -> Self {
        self.ready_replicas = Some(replicas);
        self
    }

    /// Set or replace a condition by type.
    ///
    /// The transition time is carried over from `previous` when the status
    /// did not change, so re-applying an unchanged condition is a no-op.
    pub fn with_condition(
        mut self,
        mut condition: OperatorConditionApplyConfiguration,
        previous: Option<&OperatorStatusApplyConfiguration>,
    ) -> Self {
        let prior = previous
            .and_then(|p| p.conditions.as_ref())
            .and_then(|conds| conds.iter().find(|c| c.type_ == condition.type_));

        condition.last_transition_time = match prior {
            Some(p) if p.status == condition.status && p.last_transition_time.is_some() => {
                p.last_transition_time.clone()
            }
            _ => Some(Time(chrono::Utc::now())),
        };

        let conditions = self.conditions.get_or_insert_with(Vec::new);
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => conditions.push(condition),
        }
        self
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&OperatorConditionApplyConfiguration> {
        self.conditions
            .as_ref()
            .and_then(|conds| conds.iter().find(|c| c.type_.as_deref() == Some(type_)))
    }
}

/// Partial operator condition; `type` is the list merge key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConditionApplyConfiguration {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ConditionStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperatorConditionApplyConfiguration {
    pub fn new(type_: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            type_: Some(type_.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<&OperatorCondition> for OperatorConditionApplyConfiguration {
    fn from(c: &OperatorCondition) -> Self {
        Self {
            type_: Some(c.type_.clone()),
            status: Some(c.status),
            last_transition_time: c.last_transition_time.clone(),
            reason: c.reason.clone(),
            message: c.message.clone(),
        }
    }
}
