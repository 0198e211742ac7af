//! Typed extraction of owned fields
//!
//! The generic operator client works with `DynamicObject`s. To compute a
//! minimal server-side apply patch it needs to know which spec and status
//! fields its field manager currently owns, as typed apply configurations.

use super::fields::{extract_owned, merge_sets};
use crate::crd::{
    ClusterCSIDriver, ClusterCSIDriverSpecApplyConfiguration,
    ClusterCSIDriverStatusApplyConfiguration, OperatorSpecApplyConfiguration,
    OperatorStatusApplyConfiguration,
};
use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::trace;

/// Managed-fields operation recorded for server-side apply
const APPLY_OPERATION: &str = "Apply";

/// Subresource used for status ownership
const STATUS_SUBRESOURCE: &str = "status";

/// Fields of a ClusterCSIDriver owned by one field manager
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterCSIDriverApplyConfiguration {
    pub name: Option<String>,
    pub spec: Option<ClusterCSIDriverSpecApplyConfiguration>,
    pub status: Option<ClusterCSIDriverStatusApplyConfiguration>,
}

// =============================================================================
// Conversion
// =============================================================================

/// Decode a dynamic object into the typed ClusterCSIDriver.
///
/// An object without a spec section decodes with an empty spec.
pub fn to_cluster_csi_driver(obj: &DynamicObject) -> Result<ClusterCSIDriver> {
    let conversion_error = |reason: String| Error::Conversion {
        kind: "ClusterCSIDriver".to_string(),
        reason,
    };

    let mut value = serde_json::to_value(obj).map_err(|e| conversion_error(e.to_string()))?;
    if let Value::Object(map) = &mut value {
        let spec = map
            .entry("spec")
            .or_insert_with(|| Value::Object(Default::default()));
        if spec.is_null() {
            *spec = Value::Object(Default::default());
        }
    }

    serde_json::from_value(value).map_err(|e| conversion_error(e.to_string()))
}

// =============================================================================
// Extraction
// =============================================================================

/// Fields of the main resource (spec) owned by `field_manager`
pub fn extract_cluster_csi_driver(
    obj: &ClusterCSIDriver,
    field_manager: &str,
) -> Result<ClusterCSIDriverApplyConfiguration> {
    extract(obj, field_manager, "")
}

/// Fields of the status subresource owned by `field_manager`
pub fn extract_cluster_csi_driver_status(
    obj: &ClusterCSIDriver,
    field_manager: &str,
) -> Result<ClusterCSIDriverApplyConfiguration> {
    extract(obj, field_manager, STATUS_SUBRESOURCE)
}

fn extract(
    obj: &ClusterCSIDriver,
    field_manager: &str,
    subresource: &str,
) -> Result<ClusterCSIDriverApplyConfiguration> {
    let extraction_error = |reason: String| Error::Extraction {
        field_manager: field_manager.to_string(),
        reason,
    };

    let mut out = ClusterCSIDriverApplyConfiguration {
        name: obj.metadata.name.clone(),
        ..Default::default()
    };

    let Some(set) = owned_fields(&obj.metadata, field_manager, subresource) else {
        trace!(field_manager, subresource, "Field manager owns no fields");
        return Ok(out);
    };

    let typed = serde_json::to_value(obj).map_err(|e| extraction_error(e.to_string()))?;
    let section = |name: &str| -> Option<Value> {
        let value = typed.get(name).filter(|v| !v.is_null())?;
        let section_set = set.get(format!("f:{}", name))?;
        extract_owned(value, section_set)
    };

    if subresource == STATUS_SUBRESOURCE {
        if let Some(status) = section("status") {
            out.status =
                Some(serde_json::from_value(status).map_err(|e| extraction_error(e.to_string()))?);
        }
    } else if let Some(spec) = section("spec") {
        out.spec = Some(serde_json::from_value(spec).map_err(|e| extraction_error(e.to_string()))?);
    }

    Ok(out)
}

/// Union of the FieldsV1 sets applied by `field_manager` on `subresource`
fn owned_fields(meta: &ObjectMeta, field_manager: &str, subresource: &str) -> Option<Value> {
    let mut merged: Option<Value> = None;
    for entry in meta.managed_fields.iter().flatten() {
        let matches = entry.manager.as_deref() == Some(field_manager)
            && entry.operation.as_deref() == Some(APPLY_OPERATION)
            && entry.subresource.as_deref().unwrap_or("") == subresource;
        if !matches {
            continue;
        }
        let Some(fields) = entry.fields_v1.as_ref() else {
            continue;
        };
        match merged.as_mut() {
            Some(m) => merge_sets(m, &fields.0),
            None => merged = Some(fields.0.clone()),
        }
    }
    merged
}

// =============================================================================
// Bridge entry points
// =============================================================================

/// Operator spec fields of `obj` owned by `field_manager`.
///
/// `Ok(None)` when the manager owns nothing in the spec.
pub fn extract_operator_spec(
    obj: &DynamicObject,
    field_manager: &str,
) -> Result<Option<OperatorSpecApplyConfiguration>> {
    let typed = to_cluster_csi_driver(obj)?;
    let extracted = extract_cluster_csi_driver(&typed, field_manager)?;
    Ok(extracted.spec.map(|spec| spec.operator_spec))
}

/// Operator status fields of `obj` owned by `field_manager`.
///
/// `Ok(None)` when the manager owns nothing in the status.
pub fn extract_operator_status(
    obj: &DynamicObject,
    field_manager: &str,
) -> Result<Option<OperatorStatusApplyConfiguration>> {
    let typed = to_cluster_csi_driver(obj)?;
    let extracted = extract_cluster_csi_driver_status(&typed, field_manager)?;
    Ok(extracted.status.map(|status| status.operator_status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConditionStatus, LogLevel, ManagementState};
    use assert_matches::assert_matches;
    use serde_json::json;

    const MANAGER: &str = "PowerVSBlockDriverControllerServiceController";

    fn dynamic(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    fn driver_with_managed_fields(managed_fields: Value) -> DynamicObject {
        dynamic(json!({
            "apiVersion": "operator.openshift.io/v1",
            "kind": "ClusterCSIDriver",
            "metadata": {
                "name": "powervs.csi.ibm.com",
                "managedFields": managed_fields
            },
            "spec": {
                "managementState": "Managed",
                "logLevel": "Debug",
                "operatorLogLevel": "Normal"
            },
            "status": {
                "readyReplicas": 0,
                "conditions": [
                    {
                        "type": "ControllerAvailable",
                        "status": "True",
                        "lastTransitionTime": "2024-05-01T10:00:00Z",
                        "reason": "AsExpected"
                    },
                    {
                        "type": "NodeAvailable",
                        "status": "False",
                        "lastTransitionTime": "2024-05-01T10:00:00Z"
                    }
                ]
            }
        }))
    }

    #[test]
    fn test_empty_spec_returns_none() {
        let obj = dynamic(json!({
            "apiVersion": "operator.openshift.io/v1",
            "kind": "ClusterCSIDriver",
            "metadata": { "name": "powervs.csi.ibm.com" }
        }));

        assert_eq!(extract_operator_spec(&obj, MANAGER).unwrap(), None);
        assert_eq!(extract_operator_status(&obj, MANAGER).unwrap(), None);
    }

    #[test]
    fn test_manager_owning_nothing_returns_none() {
        let obj = driver_with_managed_fields(json!([
            {
                "manager": "someone-else",
                "operation": "Apply",
                "fieldsType": "FieldsV1",
                "fieldsV1": { "f:spec": { "f:logLevel": {} } }
            }
        ]));

        assert_eq!(extract_operator_spec(&obj, MANAGER).unwrap(), None);
        assert_eq!(extract_operator_status(&obj, MANAGER).unwrap(), None);
    }

    #[test]
    fn test_update_operations_are_not_owned_by_apply() {
        let obj = driver_with_managed_fields(json!([
            {
                "manager": MANAGER,
                "operation": "Update",
                "fieldsType": "FieldsV1",
                "fieldsV1": { "f:spec": { "f:logLevel": {} } }
            }
        ]));

        assert_eq!(extract_operator_spec(&obj, MANAGER).unwrap(), None);
    }

    #[test]
    fn test_extract_owned_spec_fields() {
        let obj = driver_with_managed_fields(json!([
            {
                "manager": MANAGER,
                "operation": "Apply",
                "fieldsType": "FieldsV1",
                "fieldsV1": { "f:spec": { "f:logLevel": {} } }
            }
        ]));

        let spec = extract_operator_spec(&obj, MANAGER).unwrap().unwrap();
        assert_eq!(
            spec,
            OperatorSpecApplyConfiguration {
                log_level: Some(LogLevel::Debug),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_extract_owned_status_fields() {
        let obj = driver_with_managed_fields(json!([
            {
                "manager": MANAGER,
                "operation": "Apply",
                "subresource": "status",
                "fieldsType": "FieldsV1",
                "fieldsV1": {
                    "f:status": {
                        "f:conditions": {
                            "k:{\"type\":\"ControllerAvailable\"}": {
                                ".": {}, "f:type": {}, "f:status": {}, "f:lastTransitionTime": {}, "f:reason": {}
                            }
                        }
                    }
                }
            },
            {
                "manager": MANAGER,
                "operation": "Apply",
                "fieldsType": "FieldsV1",
                "fieldsV1": { "f:spec": { "f:managementState": {} } }
            }
        ]));

        let status = extract_operator_status(&obj, MANAGER).unwrap().unwrap();
        let conditions = status.conditions.as_ref().unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_.as_deref(), Some("ControllerAvailable"));
        assert_eq!(conditions[0].status, Some(ConditionStatus::True));
        assert_eq!(conditions[0].reason.as_deref(), Some("AsExpected"));
        assert!(status.ready_replicas.is_none());

        let spec = extract_operator_spec(&obj, MANAGER).unwrap().unwrap();
        assert_eq!(spec.management_state, Some(ManagementState::Managed));
        assert!(spec.log_level.is_none());
    }

    #[test]
    fn test_conversion_failure_is_distinct_error() {
        let obj = dynamic(json!({
            "apiVersion": "operator.openshift.io/v1",
            "kind": "ClusterCSIDriver",
            "metadata": { "name": "powervs.csi.ibm.com" },
            "spec": { "logLevel": 42 }
        }));

        assert_matches!(
            extract_operator_spec(&obj, MANAGER),
            Err(Error::Conversion { ref kind, .. }) if kind == "ClusterCSIDriver"
        );
        assert_matches!(
            extract_operator_status(&obj, MANAGER),
            Err(Error::Conversion { .. })
        );
    }
}
