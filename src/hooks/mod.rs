//! Manifest Hooks
//!
//! Hooks rewrite a freshly rendered workload manifest from live cluster
//! state right before it is applied:
//! - `endpoints`: custom IBM Cloud service endpoints into the driver container
//! - `proxy`: observed cluster proxy settings into every container
//! - `ca_bundle`: trusted CA bundle volume and mounts
//! - `secret_hash`: rollout-triggering annotations for referenced secrets
//! - `replicas`: controller replica count from schedulable node count
//!
//! Hooks are composed into a [`HookPipeline`] and run in registration order.

pub mod ca_bundle;
pub mod endpoints;
pub mod proxy;
pub mod replicas;
pub mod secret_hash;

pub use ca_bundle::*;
pub use endpoints::*;
pub use proxy::*;
pub use replicas::*;
pub use secret_hash::*;

use crate::crd::OperatorSpec;
use crate::domain::Workload;
use crate::error::Result;
use k8s_openapi::api::core::v1::{Container, EnvVar};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Name of the container running the CSI driver itself
pub const DRIVER_CONTAINER_NAME: &str = "csi-driver";

// =============================================================================
// Hook Trait
// =============================================================================

/// A mutation applied to a manifest before it is applied.
///
/// Hooks read live state through listers only and must be idempotent:
/// running a hook twice against the same inputs yields the same manifest.
pub trait ManifestHook<W>: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    fn mutate(&self, spec: &OperatorSpec, manifest: &mut W) -> Result<()>;
}

/// Adapts a closure into a named hook
pub struct FnHook<F> {
    name: String,
    f: F,
}

/// Build a hook from a closure
pub fn hook_fn<W, F>(name: impl Into<String>, f: F) -> FnHook<F>
where
    F: Fn(&OperatorSpec, &mut W) -> Result<()> + Send + Sync,
{
    FnHook {
        name: name.into(),
        f,
    }
}

impl<W, F> ManifestHook<W> for FnHook<F>
where
    F: Fn(&OperatorSpec, &mut W) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn mutate(&self, spec: &OperatorSpec, manifest: &mut W) -> Result<()> {
        (self.f)(spec, manifest)
    }
}

// =============================================================================
// Hook Pipeline
// =============================================================================

/// Ordered list of hooks applied to the same manifest
pub struct HookPipeline<W> {
    hooks: Vec<Box<dyn ManifestHook<W>>>,
}

impl<W: Workload> Default for HookPipeline<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Workload> HookPipeline<W> {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook; later hooks see earlier hooks' mutations
    pub fn with_hook(mut self, hook: impl ManifestHook<W> + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Hook names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.name()).collect()
    }

    /// Run every hook in order, stopping at the first error.
    ///
    /// The error is returned as produced by the hook.
    pub fn run(&self, spec: &OperatorSpec, manifest: &mut W) -> Result<()> {
        for hook in &self.hooks {
            debug!(hook = hook.name(), kind = W::KIND, "Running manifest hook");
            if let Err(e) = hook.mutate(spec, manifest) {
                warn!(hook = hook.name(), kind = W::KIND, error = %e, "Manifest hook failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Set an env var on a container, replacing the value of an entry with the
/// same name in place or appending a new one.
pub fn upsert_env(container: &mut Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|e| e.name == name) {
        Some(existing) => {
            existing.value = Some(value.to_string());
            existing.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }),
    }
}

/// Set an annotation on object metadata
pub fn set_annotation(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

/// Set an annotation on the workload's pod template
pub fn set_pod_annotation<W: Workload>(manifest: &mut W, key: &str, value: &str) {
    let meta = manifest
        .pod_template_mut()
        .metadata
        .get_or_insert_with(Default::default);
    set_annotation(meta, key, value);
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::ObjectLister;
    use crate::error::{Error, Result};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{Container, EnvVar};
    use std::sync::Arc;

    /// Lister that always fails
    pub struct FailingLister;

    impl<K> ObjectLister<K> for FailingLister {
        fn get(&self, _namespace: Option<&str>, _name: &str) -> Result<Arc<K>> {
            Err(Error::CacheNotSynced("test".into()))
        }

        fn list(&self) -> Vec<Arc<K>> {
            Vec::new()
        }
    }

    pub fn container(name: &str, env: &[(&str, &str)]) -> Container {
        Container {
            name: name.into(),
            env: Some(
                env.iter()
                    .map(|(n, v)| EnvVar {
                        name: n.to_string(),
                        value: Some(v.to_string()),
                        value_from: None,
                    })
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn deployment(containers: Vec<Container>) -> Deployment {
        use crate::domain::Workload;
        let mut deployment = Deployment::default();
        *deployment.containers_mut() = containers;
        deployment
    }

    pub fn env_of(deployment: &mut Deployment, container: &str) -> Vec<(String, String)> {
        use crate::domain::Workload;
        deployment
            .container_mut(container)
            .and_then(|c| c.env.clone())
            .unwrap_or_default()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use k8s_openapi::api::apps::v1::Deployment;

    #[test]
    fn test_upsert_env_replaces_by_name() {
        let mut c = container("csi-driver", &[("A", "1"), ("B", "2")]);
        upsert_env(&mut c, "A", "10");
        upsert_env(&mut c, "C", "3");

        let env: Vec<_> = c
            .env
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.value.unwrap()))
            .collect();
        assert_eq!(
            env,
            vec![
                ("A".to_string(), "10".to_string()),
                ("B".to_string(), "2".to_string()),
                ("C".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_pipeline_runs_in_order() {
        let pipeline = HookPipeline::<Deployment>::new()
            .with_hook(hook_fn("first", |_: &OperatorSpec, d: &mut Deployment| {
                set_annotation(&mut d.metadata, "order", "first");
                Ok(())
            }))
            .with_hook(hook_fn("second", |_: &OperatorSpec, d: &mut Deployment| {
                set_annotation(&mut d.metadata, "order", "second");
                Ok(())
            }));

        assert_eq!(pipeline.names(), vec!["first", "second"]);

        let mut deployment = Deployment::default();
        pipeline.run(&OperatorSpec::default(), &mut deployment).unwrap();
        assert_eq!(
            deployment.metadata.annotations.unwrap()["order"],
            "second"
        );
    }

    #[test]
    fn test_pipeline_stops_at_first_error() {
        let pipeline = HookPipeline::<Deployment>::new()
            .with_hook(hook_fn("fail", |_: &OperatorSpec, _: &mut Deployment| {
                Err(Error::not_found("Secret", "ns/missing"))
            }))
            .with_hook(hook_fn("never", |_: &OperatorSpec, d: &mut Deployment| {
                set_annotation(&mut d.metadata, "ran", "yes");
                Ok(())
            }));

        let mut deployment = Deployment::default();
        let err = pipeline
            .run(&OperatorSpec::default(), &mut deployment)
            .unwrap_err();
        assert_matches!(err, Error::ResourceNotFound { ref name, .. } if name == "ns/missing");
        assert!(deployment.metadata.annotations.is_none());
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
