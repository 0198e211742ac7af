//! Controller Replica Count
//!
//! The controller Deployment runs two replicas when more than one node can
//! host it (by the pod template's node selector) and one otherwise, so single
//! node clusters do not carry a permanently pending pod.

use super::ManifestHook;
use crate::crd::OperatorSpec;
use crate::domain::{ObjectLister, Workload};
use crate::error::Result;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Sets `spec.replicas` from the number of matching nodes
pub struct ReplicasHook {
    nodes: Arc<dyn ObjectLister<Node>>,
}

impl ReplicasHook {
    pub fn new(nodes: Arc<dyn ObjectLister<Node>>) -> Self {
        Self { nodes }
    }

    /// Number of cached nodes carrying every label of `selector`
    pub fn matching_nodes(&self, selector: &BTreeMap<String, String>) -> usize {
        self.nodes
            .list()
            .iter()
            .filter(|node| {
                let labels = node.metadata.labels.as_ref();
                selector
                    .iter()
                    .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
            })
            .count()
    }
}

impl ManifestHook<Deployment> for ReplicasHook {
    fn name(&self) -> &str {
        "replicas"
    }

    fn mutate(&self, _spec: &OperatorSpec, manifest: &mut Deployment) -> Result<()> {
        let selector = manifest
            .pod_template()
            .and_then(|t| t.spec.as_ref())
            .and_then(|s| s.node_selector.clone())
            .unwrap_or_default();

        let count = self.matching_nodes(&selector);
        let replicas = if count > 1 { 2 } else { 1 };
        debug!(nodes = count, replicas, "Computed controller replicas");

        manifest.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::controlplane::MemoryLister;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(name: &str, master: bool) -> Node {
        let mut labels = BTreeMap::from([("kubernetes.io/os".to_string(), "linux".to_string())]);
        if master {
            labels.insert("node-role.kubernetes.io/master".to_string(), String::new());
        }
        Node {
            metadata: ObjectMeta {
                name: Some(name.into()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn controller_deployment() -> Deployment {
        let mut d = deployment(vec![container("csi-driver", &[])]);
        d.pod_spec_mut().node_selector = Some(BTreeMap::from([(
            "node-role.kubernetes.io/master".to_string(),
            String::new(),
        )]));
        d
    }

    fn replicas_of(d: &Deployment) -> Option<i32> {
        d.spec.as_ref().and_then(|s| s.replicas)
    }

    #[test]
    fn test_single_master_gets_one_replica() {
        let lister = MemoryLister::new();
        lister.insert(node("master-0", true));
        lister.insert(node("worker-0", false));
        lister.insert(node("worker-1", false));

        let mut d = controller_deployment();
        ReplicasHook::new(Arc::new(lister))
            .mutate(&OperatorSpec::default(), &mut d)
            .unwrap();
        assert_eq!(replicas_of(&d), Some(1));
    }

    #[test]
    fn test_multiple_masters_get_two_replicas() {
        let lister = MemoryLister::new();
        for i in 0..3 {
            lister.insert(node(&format!("master-{}", i), true));
        }

        let mut d = controller_deployment();
        ReplicasHook::new(Arc::new(lister))
            .mutate(&OperatorSpec::default(), &mut d)
            .unwrap();
        assert_eq!(replicas_of(&d), Some(2));
    }

    #[test]
    fn test_no_nodes_gets_one_replica() {
        let mut d = controller_deployment();
        ReplicasHook::new(Arc::new(MemoryLister::<Node>::new()))
            .mutate(&OperatorSpec::default(), &mut d)
            .unwrap();
        assert_eq!(replicas_of(&d), Some(1));
    }
}
