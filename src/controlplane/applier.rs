//! Server-side apply of workload manifests

use crate::domain::ManifestApplier;
use crate::error::{Error, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use kube::api::{Api, Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

/// Applies namespaced workloads with server-side apply, retrying
/// conflicts and server errors with exponential backoff.
#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
    max_elapsed: Duration,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            max_elapsed: Duration::from_secs(30),
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }
}

#[async_trait]
impl<W> ManifestApplier<W> for KubeApplier
where
    W: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn apply(&self, manifest: &W, field_manager: &str) -> Result<W> {
        let name = manifest.name_any();
        let namespace = manifest.namespace().ok_or_else(|| {
            Error::Configuration(format!("{} {} has no namespace", W::kind(&()), name))
        })?;
        let api: Api<W> = Api::namespaced(self.client.clone(), &namespace);
        let params = PatchParams::apply(field_manager).force();

        let policy = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        let applied = backoff::future::retry(policy, || async {
            api.patch(&name, &params, &Patch::Apply(manifest))
                .await
                .map_err(|e| {
                    let err = Error::from(e);
                    if err.is_transient() {
                        warn!(name = %name, error = %err, "Transient apply failure, retrying");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
        })
        .await?;

        debug!(
            kind = %W::kind(&()),
            namespace = %namespace,
            name = %name,
            field_manager,
            "Applied manifest"
        );
        Ok(applied)
    }
}
