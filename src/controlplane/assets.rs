//! Embedded manifest templates
//!
//! Workload manifests are shipped inside the binary and rendered per
//! reconcile pass by substituting `${...}` placeholders with the operand
//! namespace, images, and log verbosity.

use crate::crd::OperatorSpec;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;

pub const CONTROLLER_ASSET: &str = "controller.yaml";
pub const NODE_ASSET: &str = "node.yaml";

/// Raw template contents by file name
pub fn read_asset(name: &str) -> Result<&'static str> {
    match name {
        CONTROLLER_ASSET => Ok(include_str!("../../assets/controller.yaml")),
        NODE_ASSET => Ok(include_str!("../../assets/node.yaml")),
        other => Err(Error::ManifestRender {
            asset: other.to_string(),
            reason: "no such asset".to_string(),
        }),
    }
}

/// Operand images, normally injected through the operator's environment
#[derive(Debug, Clone, Default)]
pub struct ImageConfig {
    pub driver: String,
    pub provisioner: String,
    pub attacher: String,
    pub resizer: String,
    pub snapshotter: String,
    pub node_driver_registrar: String,
    pub liveness_probe: String,
    pub kube_rbac_proxy: String,
}

/// Renders templates into typed manifests
#[derive(Debug, Clone)]
pub struct AssetRenderer {
    namespace: String,
    images: ImageConfig,
}

impl AssetRenderer {
    pub fn new(namespace: impl Into<String>, images: ImageConfig) -> Self {
        Self {
            namespace: namespace.into(),
            images,
        }
    }

    fn replacements(&self, spec: &OperatorSpec) -> [(&'static str, String); 10] {
        [
            ("${NAMESPACE}", self.namespace.clone()),
            ("${DRIVER_IMAGE}", self.images.driver.clone()),
            ("${PROVISIONER_IMAGE}", self.images.provisioner.clone()),
            ("${ATTACHER_IMAGE}", self.images.attacher.clone()),
            ("${RESIZER_IMAGE}", self.images.resizer.clone()),
            ("${SNAPSHOTTER_IMAGE}", self.images.snapshotter.clone()),
            (
                "${NODE_DRIVER_REGISTRAR_IMAGE}",
                self.images.node_driver_registrar.clone(),
            ),
            ("${LIVENESS_PROBE_IMAGE}", self.images.liveness_probe.clone()),
            ("${KUBE_RBAC_PROXY_IMAGE}", self.images.kube_rbac_proxy.clone()),
            ("${LOG_LEVEL}", spec.log_level().verbosity().to_string()),
        ]
    }

    /// Template text with every placeholder substituted
    pub fn render_str(&self, asset: &str, spec: &OperatorSpec) -> Result<String> {
        let mut rendered = read_asset(asset)?.to_string();
        for (placeholder, value) in self.replacements(spec) {
            rendered = rendered.replace(placeholder, &value);
        }

        if let Some(start) = rendered.find("${") {
            let placeholder: String = rendered[start..].chars().take_while(|c| *c != '}').collect();
            return Err(Error::ManifestRender {
                asset: asset.to_string(),
                reason: format!("unknown placeholder {}}}", placeholder),
            });
        }
        Ok(rendered)
    }

    /// Render and decode a template
    pub fn render<W: DeserializeOwned>(&self, asset: &str, spec: &OperatorSpec) -> Result<W> {
        let rendered = self.render_str(asset, spec)?;
        serde_yaml::from_str(&rendered).map_err(|e| Error::ManifestRender {
            asset: asset.to_string(),
            reason: e.to_string(),
        })
    }
}
