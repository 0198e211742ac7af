//! Observed Proxy Injection
//!
//! The CSI config observer writes the cluster-wide proxy into
//! `spec.observedConfig.targetcsiconfig.proxy` as a map of env var name to
//! value. Every container of the operand gets those variables.

use super::{upsert_env, ManifestHook};
use crate::crd::OperatorSpec;
use crate::domain::Workload;
use crate::error::Result;
use tracing::debug;

/// Path of the proxy settings inside `observedConfig`
pub const PROXY_CONFIG_PATH: &[&str] = &["targetcsiconfig", "proxy"];

/// Injects observed proxy env vars into all containers
#[derive(Debug, Default, Clone)]
pub struct ObservedProxyHook;

impl ObservedProxyHook {
    pub fn new() -> Self {
        Self
    }

    /// Proxy env vars from the operator spec, sorted by name
    pub fn proxy_env(spec: &OperatorSpec) -> Vec<(String, String)> {
        let Some(mut node) = spec.observed_config.as_ref() else {
            return Vec::new();
        };
        for segment in PROXY_CONFIG_PATH {
            match node.get(segment) {
                Some(next) => node = next,
                None => return Vec::new(),
            }
        }

        node.as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<W: Workload> ManifestHook<W> for ObservedProxyHook {
    fn name(&self) -> &str {
        "observed-proxy"
    }

    fn mutate(&self, spec: &OperatorSpec, manifest: &mut W) -> Result<()> {
        let env = Self::proxy_env(spec);
        if env.is_empty() {
            return Ok(());
        }

        for container in manifest.containers_mut().iter_mut() {
            for (name, value) in &env {
                upsert_env(container, name, value);
            }
        }

        debug!(kind = W::KIND, vars = env.len(), "Injected observed proxy settings");
        Ok(())
    }
}
