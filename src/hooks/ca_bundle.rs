//! Trusted CA Bundle Injection
//!
//! The cluster network operator fills a labelled config map with the
//! cluster's trusted CA bundle. When it carries a bundle, the bundle is
//! mounted over the system trust store of every container and its digest is
//! recorded on the pod template so bundle rotation rolls the pods.

use super::{set_pod_annotation, sha256_hex, ManifestHook};
use crate::crd::OperatorSpec;
use crate::domain::{ObjectLister, Workload};
use crate::error::Result;
use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, KeyToPath, Volume, VolumeMount};
use std::sync::Arc;
use tracing::debug;

pub const CA_BUNDLE_KEY: &str = "ca-bundle.crt";
pub const CA_BUNDLE_VOLUME_NAME: &str = "non-standard-root-system-trust-ca-bundle";
pub const CA_BUNDLE_MOUNT_PATH: &str = "/etc/pki/ca-trust/extracted/pem";
pub const CA_BUNDLE_FILE_NAME: &str = "tls-ca-bundle.pem";
pub const CA_BUNDLE_HASH_ANNOTATION: &str = "operator.openshift.io/trusted-ca-bundle-hash";

/// Mounts the trusted CA bundle config map into every container
pub struct CaBundleHook {
    namespace: String,
    config_map_name: String,
    config_maps: Arc<dyn ObjectLister<ConfigMap>>,
}

impl CaBundleHook {
    pub fn new(
        namespace: impl Into<String>,
        config_map_name: impl Into<String>,
        config_maps: Arc<dyn ObjectLister<ConfigMap>>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            config_map_name: config_map_name.into(),
            config_maps,
        }
    }
}

impl<W: Workload> ManifestHook<W> for CaBundleHook {
    fn name(&self) -> &str {
        "ca-bundle"
    }

    fn mutate(&self, _spec: &OperatorSpec, manifest: &mut W) -> Result<()> {
        let config_map = match self
            .config_maps
            .get(Some(&self.namespace), &self.config_map_name)
        {
            Ok(cm) => cm,
            Err(e) if e.is_not_found() => {
                debug!(
                    config_map = %self.config_map_name,
                    "Trusted CA bundle config map not found, skipping"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let bundle = match config_map.data.as_ref().and_then(|d| d.get(CA_BUNDLE_KEY)) {
            Some(bundle) if !bundle.is_empty() => bundle,
            _ => return Ok(()),
        };

        let volume = Volume {
            name: CA_BUNDLE_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(self.config_map_name.clone()),
                items: Some(vec![KeyToPath {
                    key: CA_BUNDLE_KEY.to_string(),
                    path: CA_BUNDLE_FILE_NAME.to_string(),
                    mode: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let pod_spec = manifest.pod_spec_mut();
        let volumes = pod_spec.volumes.get_or_insert_with(Vec::new);
        match volumes.iter_mut().find(|v| v.name == CA_BUNDLE_VOLUME_NAME) {
            Some(existing) => *existing = volume,
            None => volumes.push(volume),
        }

        for container in pod_spec.containers.iter_mut() {
            let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
            if !mounts.iter().any(|m| m.name == CA_BUNDLE_VOLUME_NAME) {
                mounts.push(VolumeMount {
                    name: CA_BUNDLE_VOLUME_NAME.to_string(),
                    mount_path: CA_BUNDLE_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                });
            }
        }

        set_pod_annotation(manifest, CA_BUNDLE_HASH_ANNOTATION, &sha256_hex(bundle.as_bytes()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::controlplane::MemoryLister;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    const NS: &str = "openshift-cluster-csi-drivers";
    const CM: &str = "ibm-powervs-block-csi-driver-trusted-ca-bundle";

    fn config_map(data: Option<&str>) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(CM.into()),
                namespace: Some(NS.into()),
                ..Default::default()
            },
            data: data.map(|d| BTreeMap::from([(CA_BUNDLE_KEY.to_string(), d.to_string())])),
            ..Default::default()
        }
    }

    fn hook_with(cm: Option<ConfigMap>) -> CaBundleHook {
        let lister = MemoryLister::new();
        if let Some(cm) = cm {
            lister.insert(cm);
        }
        CaBundleHook::new(NS, CM, Arc::new(lister))
    }

    #[test]
    fn test_missing_config_map_is_noop() {
        let hook = hook_with(None);
        let mut manifest = deployment(vec![container("csi-driver", &[])]);
        let before = manifest.clone();

        hook.mutate(&OperatorSpec::default(), &mut manifest).unwrap();
        assert_eq!(manifest, before);
    }

    #[test]
    fn test_empty_bundle_is_noop() {
        for cm in [config_map(None), config_map(Some(""))] {
            let hook = hook_with(Some(cm));
            let mut manifest = deployment(vec![container("csi-driver", &[])]);
            let before = manifest.clone();

            hook.mutate(&OperatorSpec::default(), &mut manifest).unwrap();
            assert_eq!(manifest, before);
        }
    }

    #[test]
    fn test_bundle_mounted_into_all_containers() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let hook = hook_with(Some(config_map(Some(pem))));
        let mut manifest = deployment(vec![
            container("csi-driver", &[]),
            container("csi-provisioner", &[]),
        ]);

        hook.mutate(&OperatorSpec::default(), &mut manifest).unwrap();
        let once = manifest.clone();
        hook.mutate(&OperatorSpec::default(), &mut manifest).unwrap();
        assert_eq!(manifest, once);

        let pod_spec = manifest.pod_spec_mut().clone();
        let volumes = pod_spec.volumes.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0].config_map.as_ref().unwrap().name.as_deref(),
            Some(CM)
        );
        for c in &pod_spec.containers {
            let mounts = c.volume_mounts.as_ref().unwrap();
            assert_eq!(mounts.len(), 1);
            assert_eq!(mounts[0].mount_path, CA_BUNDLE_MOUNT_PATH);
            assert_eq!(mounts[0].read_only, Some(true));
        }

        let annotations = manifest
            .pod_template()
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.clone())
            .unwrap();
        assert_eq!(annotations[CA_BUNDLE_HASH_ANNOTATION], sha256_hex(pem.as_bytes()));
    }

    #[test]
    fn test_lookup_failure_propagates() {
        let hook = CaBundleHook::new(NS, CM, Arc::new(FailingLister));
        let mut manifest = deployment(vec![container("csi-driver", &[])]);

        assert!(hook.mutate(&OperatorSpec::default(), &mut manifest).is_err());
    }
}
