//! Secret Hash Annotations
//!
//! Pods consume the cloud credentials and metrics serving certificate as
//! mounted secrets. Recording a digest of each secret on the pod template
//! makes a secret rotation produce a new rollout.

use super::{set_annotation, set_pod_annotation, sha256_hex, ManifestHook};
use crate::crd::OperatorSpec;
use crate::domain::{ObjectLister, Workload};
use crate::error::Result;
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;

const ANNOTATION_PREFIX: &str = "operator.openshift.io/";

/// Longest name segment allowed in an annotation key
const MAX_NAME_SEGMENT: usize = 63;

/// Annotation key recording the hash of `namespace/name`
pub fn secret_hash_annotation(namespace: &str, name: &str) -> String {
    let segment = format!("dep-{}-{}-secret", namespace, name);
    if segment.len() <= MAX_NAME_SEGMENT {
        return format!("{}{}", ANNOTATION_PREFIX, segment);
    }
    let digest = sha256_hex(format!("{}/{}", namespace, name).as_bytes());
    format!("{}dep-{}-secret", ANNOTATION_PREFIX, &digest[..16])
}

/// Digest of a secret's data; stable across map ordering
pub fn secret_hash(secret: &Secret) -> Result<String> {
    let data = serde_json::to_vec(&secret.data)?;
    Ok(sha256_hex(&data))
}

/// Annotates the workload with the hash of one secret
pub struct SecretHashAnnotationHook {
    label: String,
    namespace: String,
    secret_name: String,
    secrets: Arc<dyn ObjectLister<Secret>>,
}

impl SecretHashAnnotationHook {
    pub fn new(
        namespace: impl Into<String>,
        secret_name: impl Into<String>,
        secrets: Arc<dyn ObjectLister<Secret>>,
    ) -> Self {
        let secret_name = secret_name.into();
        Self {
            label: format!("secret-hash/{}", secret_name),
            namespace: namespace.into(),
            secret_name,
            secrets,
        }
    }
}

impl<W: Workload> ManifestHook<W> for SecretHashAnnotationHook {
    fn name(&self) -> &str {
        &self.label
    }

    fn mutate(&self, _spec: &OperatorSpec, manifest: &mut W) -> Result<()> {
        let secret = self.secrets.get(Some(&self.namespace), &self.secret_name)?;
        let hash = secret_hash(&secret)?;
        let key = secret_hash_annotation(&self.namespace, &self.secret_name);

        set_annotation(manifest.metadata_mut(), &key, &hash);
        set_pod_annotation(manifest, &key, &hash);
        Ok(())
    }
}
