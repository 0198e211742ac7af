//! Custom Service Endpoint Injection
//!
//! Power VS clusters may be installed against private or regional IBM Cloud
//! service endpoints. The installer records them on the Infrastructure
//! singleton; this hook forwards them to the driver as environment variables.

use super::{upsert_env, ManifestHook, DRIVER_CONTAINER_NAME};
use crate::crd::{Infrastructure, OperatorSpec, INFRASTRUCTURE_NAME};
use crate::domain::{ObjectLister, Workload};
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const IAM_ENDPOINT_ENV: &str = "IBMCLOUD_IAM_API_ENDPOINT";
pub const RESOURCE_CONTROLLER_ENDPOINT_ENV: &str = "IBMCLOUD_RESOURCE_CONTROLLER_API_ENDPOINT";
pub const POWER_ENDPOINT_ENV: &str = "IBMCLOUD_POWER_API_ENDPOINT";

// =============================================================================
// Endpoint Mapper
// =============================================================================

/// Maps infrastructure service identifiers to driver env var names.
///
/// Identifiers missing from the table are used verbatim, so endpoints added
/// to the platform later reach the driver without an operator change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointMapper {
    table: BTreeMap<String, String>,
}

impl Default for EndpointMapper {
    fn default() -> Self {
        Self::new([
            ("iam", IAM_ENDPOINT_ENV),
            ("rc", RESOURCE_CONTROLLER_ENDPOINT_ENV),
            ("pi", POWER_ENDPOINT_ENV),
        ])
    }
}

impl EndpointMapper {
    /// Create a mapper from an explicit table
    pub fn new<I, K, V>(table: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            table: table
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Env var name for a service identifier
    pub fn env_var_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.table.get(id).map(String::as_str).unwrap_or(id)
    }
}

// =============================================================================
// Hook
// =============================================================================

/// Injects the Infrastructure's Power VS service endpoints into the driver
/// container.
pub struct CustomEndpointsHook {
    infrastructures: Arc<dyn ObjectLister<Infrastructure>>,
    mapper: EndpointMapper,
}

impl CustomEndpointsHook {
    pub fn new(infrastructures: Arc<dyn ObjectLister<Infrastructure>>) -> Self {
        Self {
            infrastructures,
            mapper: EndpointMapper::default(),
        }
    }

    pub fn with_mapper(mut self, mapper: EndpointMapper) -> Self {
        self.mapper = mapper;
        self
    }
}

impl<W: Workload> ManifestHook<W> for CustomEndpointsHook {
    fn name(&self) -> &str {
        "custom-endpoints"
    }

    fn mutate(&self, _spec: &OperatorSpec, manifest: &mut W) -> Result<()> {
        let infra = self.infrastructures.get(None, INFRASTRUCTURE_NAME)?;

        let endpoints = infra
            .status
            .as_ref()
            .map(|s| s.powervs_service_endpoints())
            .unwrap_or_default();
        if endpoints.is_empty() {
            return Ok(());
        }

        let Some(container) = manifest.container_mut(DRIVER_CONTAINER_NAME) else {
            debug!(
                container = DRIVER_CONTAINER_NAME,
                kind = W::KIND,
                "No driver container in manifest, skipping endpoint injection"
            );
            return Ok(());
        };

        for endpoint in endpoints {
            let name = self.mapper.env_var_name(&endpoint.name);
            upsert_env(container, name, &endpoint.url);
        }

        debug!(count = endpoints.len(), "Injected custom service endpoints");
        Ok(())
    }
}
