//! Generic operator client
//!
//! Reads the operator's ClusterCSIDriver as a dynamic object and writes its
//! status with server-side apply. The object is read once per reconcile
//! pass into an [`OperatorSnapshot`]; the state bridge tells each field
//! manager which status fields it already owns in that snapshot, so
//! unchanged status is never re-applied.

use crate::bridge::{extract_operator_status, to_cluster_csi_driver};
use crate::crd::{ClusterCSIDriver, OperatorSpec, OperatorStatusApplyConfiguration};
use crate::error::Result;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

/// API resource of `operator.openshift.io/v1` ClusterCSIDrivers
pub fn cluster_csi_driver_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("operator.openshift.io", "v1", "ClusterCSIDriver");
    ApiResource::from_gvk_with_plural(&gvk, "clustercsidrivers")
}

// =============================================================================
// Snapshot
// =============================================================================

/// The ClusterCSIDriver as read at the start of a reconcile pass
#[derive(Debug, Clone)]
pub struct OperatorSnapshot {
    object: DynamicObject,
    driver: ClusterCSIDriver,
}

impl OperatorSnapshot {
    pub fn new(object: DynamicObject) -> Result<Self> {
        let driver = to_cluster_csi_driver(&object)?;
        Ok(Self { object, driver })
    }

    /// Typed operator spec
    pub fn operator_spec(&self) -> &OperatorSpec {
        &self.driver.spec.operator_spec
    }

    pub fn generation(&self) -> Option<i64> {
        self.object.metadata.generation
    }

    /// Status fields owned by `field_manager` when the snapshot was taken
    pub fn owned_operator_status(
        &self,
        field_manager: &str,
    ) -> Result<Option<OperatorStatusApplyConfiguration>> {
        extract_operator_status(&self.object, field_manager)
    }
}

/// Server-side apply body setting `desired` as the status of `name`.
///
/// `None` when `current`, the status the field manager already owns,
/// equals `desired`.
pub fn status_apply_patch(
    resource: &ApiResource,
    name: &str,
    current: Option<&OperatorStatusApplyConfiguration>,
    desired: &OperatorStatusApplyConfiguration,
) -> Option<Value> {
    if current == Some(desired) {
        return None;
    }
    Some(json!({
        "apiVersion": resource.api_version,
        "kind": resource.kind,
        "metadata": { "name": name },
        "status": desired,
    }))
}

// =============================================================================
// Client
// =============================================================================

/// Client for a single, cluster scoped operator configuration object
#[derive(Clone)]
pub struct OperatorClient {
    api: Api<DynamicObject>,
    resource: ApiResource,
    name: String,
}

impl OperatorClient {
    /// Client for the ClusterCSIDriver named `name`
    pub fn new(client: Client, name: impl Into<String>) -> Self {
        let resource = cluster_csi_driver_resource();
        Self {
            api: Api::all_with(client, &resource),
            resource,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get(&self) -> Result<DynamicObject> {
        Ok(self.api.get(&self.name).await?)
    }

    /// Read the object once for a reconcile pass
    pub async fn snapshot(&self) -> Result<OperatorSnapshot> {
        OperatorSnapshot::new(self.get().await?)
    }

    /// Apply `desired` as the full status owned by `field_manager`.
    ///
    /// `current` is what the manager owns now, as read from the pass's
    /// snapshot. Returns false when it already matched and no request was
    /// sent.
    pub async fn apply_operator_status(
        &self,
        field_manager: &str,
        current: Option<&OperatorStatusApplyConfiguration>,
        desired: &OperatorStatusApplyConfiguration,
    ) -> Result<bool> {
        let Some(patch) = status_apply_patch(&self.resource, &self.name, current, desired) else {
            debug!(field_manager, "Owned status unchanged, skipping apply");
            return Ok(false);
        };

        self.api
            .patch_status(
                &self.name,
                &PatchParams::apply(field_manager).force(),
                &Patch::Apply(&patch),
            )
            .await?;

        info!(field_manager, name = %self.name, "Applied operator status");
        Ok(true)
    }
}
