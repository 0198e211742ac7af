//! Domain Ports - Core trait definitions for the operator
//!
//! These traits define the boundaries between the manifest hooks and the
//! cluster machinery (informer caches, server-side apply). Adapters in
//! `controlplane` implement them on top of `kube`.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

// =============================================================================
// Listers
// =============================================================================

/// Read-only view over an informer cache.
///
/// Implementations never perform network I/O; lookups are served from the
/// latest snapshot delivered by the watch machinery.
pub trait ObjectLister<K>: Send + Sync {
    /// Get an object by namespace (None for cluster scoped) and name.
    ///
    /// Returns `Error::ResourceNotFound` when the cache has no such object.
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Arc<K>>;

    /// All cached objects
    fn list(&self) -> Vec<Arc<K>>;
}

// =============================================================================
// Applier
// =============================================================================

/// Applies a rendered workload manifest to the cluster
#[async_trait]
pub trait ManifestApplier<W>: Send + Sync {
    /// Server-side apply `manifest` as `field_manager`, returning the live object
    async fn apply(&self, manifest: &W, field_manager: &str) -> Result<W>;
}

// =============================================================================
// Workloads
// =============================================================================

/// A workload manifest with a pod template the hooks can rewrite
pub trait Workload: Clone + Send + Sync + 'static {
    /// Kind, for logs and conditions
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;

    fn pod_template_mut(&mut self) -> &mut PodTemplateSpec;

    /// Whether at least one pod is available
    fn is_available(&self) -> bool;

    /// Whether a rollout is still in flight
    fn is_progressing(&self) -> bool;

    /// Pods reported ready
    fn ready_replicas(&self) -> i32;

    /// Pod spec, created empty if the template has none
    fn pod_spec_mut(&mut self) -> &mut PodSpec {
        self.pod_template_mut().spec.get_or_insert_with(PodSpec::default)
    }

    /// All containers of the pod template
    fn containers_mut(&mut self) -> &mut Vec<Container> {
        &mut self.pod_spec_mut().containers
    }

    /// The container with the given name, if any
    fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        self.containers_mut().iter_mut().find(|c| c.name == name)
    }
}

impl Workload for Deployment {
    const KIND: &'static str = "Deployment";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0)
            > 0
    }

    fn ready_replicas(&self) -> i32 {
        self.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0)
    }

    fn is_progressing(&self) -> bool {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        match &self.status {
            Some(status) => {
                status.updated_replicas.unwrap_or(0) < desired
                    || status.observed_generation < self.metadata.generation
            }
            None => true,
        }
    }
}

impl Workload for DaemonSet {
    const KIND: &'static str = "DaemonSet";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }

    fn pod_template_mut(&mut self) -> &mut PodTemplateSpec {
        &mut self.spec.get_or_insert_with(Default::default).template
    }

    fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.number_available)
            .unwrap_or(0)
            > 0
    }

    fn ready_replicas(&self) -> i32 {
        self.status.as_ref().map(|s| s.number_ready).unwrap_or(0)
    }

    fn is_progressing(&self) -> bool {
        match &self.status {
            Some(status) => {
                status.updated_number_scheduled.unwrap_or(0) < status.desired_number_scheduled
                    || status.observed_generation < self.metadata.generation
            }
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStatus};

    #[test]
    fn test_deployment_container_lookup() {
        let mut deployment = Deployment::default();
        deployment.containers_mut().push(Container {
            name: "csi-driver".into(),
            ..Default::default()
        });

        assert!(deployment.container_mut("csi-driver").is_some());
        assert!(deployment.container_mut("csi-provisioner").is_none());
    }

    #[test]
    fn test_deployment_availability() {
        let mut deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!deployment.is_available());
        assert!(deployment.is_progressing());

        deployment.status = Some(DeploymentStatus {
            available_replicas: Some(2),
            updated_replicas: Some(2),
            ..Default::default()
        });
        assert!(deployment.is_available());
        assert!(!deployment.is_progressing());
    }
}
