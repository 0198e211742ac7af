//! Infrastructure CRD
//!
//! Cluster-wide singleton (`config.openshift.io/v1`) describing the platform
//! the cluster runs on. Only the parts read by the manifest hooks are typed.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Well-known name of the Infrastructure singleton
pub const INFRASTRUCTURE_NAME: &str = "cluster";

/// Infrastructure holds cluster-wide information about the platform.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    plural = "infrastructures",
    status = "InfrastructureStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_config: Option<ConfigMapFileReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_spec: Option<serde_json::Value>,
}

/// Reference to a key of a config map in the `openshift-config` namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapFileReference {
    pub name: String,
    #[serde(default)]
    pub key: String,
}

/// Observed state of the cluster infrastructure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default)]
    pub infrastructure_name: String,

    /// Platform specific status, absent on older clusters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_status: Option<PlatformStatus>,

    #[serde(default, rename = "apiServerURL")]
    pub api_server_url: String,

    #[serde(default, rename = "apiServerInternalURI")]
    pub api_server_internal_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_topology: Option<TopologyMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_topology: Option<TopologyMode>,
}

impl InfrastructureStatus {
    /// Power VS service endpoints, empty when the platform section is absent
    pub fn powervs_service_endpoints(&self) -> &[PowerVSServiceEndpoint] {
        self.platform_status
            .as_ref()
            .and_then(|ps| ps.powervs.as_ref())
            .map(|pvs| pvs.service_endpoints.as_slice())
            .unwrap_or_default()
    }
}

/// Cluster topology reported by the installer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TopologyMode {
    HighlyAvailable,
    HighlyAvailableArbiter,
    DualReplica,
    SingleReplica,
    External,
    /// A mode added by a newer release
    #[serde(other)]
    Unknown,
}

/// Platform specific status; only the Power VS block is typed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    #[serde(default, rename = "type")]
    pub type_: String,

    #[serde(default, rename = "powervs", skip_serializing_if = "Option::is_none")]
    pub powervs: Option<PowerVSPlatformStatus>,
}

/// Power VS platform details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PowerVSPlatformStatus {
    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub zone: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Custom endpoints that override the default IBM Cloud services
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_endpoints: Vec<PowerVSServiceEndpoint>,

    #[serde(default, rename = "cisInstanceCRN", skip_serializing_if = "Option::is_none")]
    pub cis_instance_crn: Option<String>,

    #[serde(default, rename = "dnsInstanceCRN", skip_serializing_if = "Option::is_none")]
    pub dns_instance_crn: Option<String>,
}

/// A named IBM Cloud service endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PowerVSServiceEndpoint {
    /// Short service identifier such as `iam` or `pi`
    pub name: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoints_absent_platform_status() {
        let status = InfrastructureStatus::default();
        assert!(status.powervs_service_endpoints().is_empty());
    }

    #[test]
    fn test_parse_powervs_status() {
        let infra: Infrastructure = serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "Infrastructure",
            "metadata": { "name": INFRASTRUCTURE_NAME },
            "spec": {},
            "status": {
                "infrastructureName": "mycluster-x7c2p",
                "apiServerURL": "https://api.mycluster.example.com:6443",
                "controlPlaneTopology": "HighlyAvailable",
                "platformStatus": {
                    "type": "PowerVS",
                    "powervs": {
                        "region": "dal",
                        "zone": "dal10",
                        "serviceEndpoints": [
                            { "name": "iam", "url": "https://iam.example.com" },
                            { "name": "pi", "url": "https://pi.example.com" }
                        ]
                    }
                }
            }
        }))
        .unwrap();

        let status = infra.status.unwrap();
        assert_eq!(status.control_plane_topology, Some(TopologyMode::HighlyAvailable));
        let endpoints = status.powervs_service_endpoints();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[1].name, "pi");
    }

    #[test]
    fn test_parse_unrecognized_topology() {
        let infra: Infrastructure = serde_json::from_value(json!({
            "apiVersion": "config.openshift.io/v1",
            "kind": "Infrastructure",
            "metadata": { "name": INFRASTRUCTURE_NAME },
            "spec": {},
            "status": {
                "controlPlaneTopology": "SomeFutureTopology",
                "infrastructureTopology": "HighlyAvailableArbiter",
                "platformStatus": {
                    "type": "PowerVS",
                    "powervs": {
                        "serviceEndpoints": [
                            { "name": "pi", "url": "https://pi.example.com" }
                        ]
                    }
                }
            }
        }))
        .unwrap();

        let status = infra.status.unwrap();
        assert_eq!(status.control_plane_topology, Some(TopologyMode::Unknown));
        assert_eq!(
            status.infrastructure_topology,
            Some(TopologyMode::HighlyAvailableArbiter)
        );
        assert_eq!(status.powervs_service_endpoints()[0].url, "https://pi.example.com");
    }
}
