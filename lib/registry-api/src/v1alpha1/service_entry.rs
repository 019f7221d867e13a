use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// ServiceEntry declares a service that should be added to the registry,
/// together with the workload endpoints that implement it
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "registry.datum.net",
    version = "v1alpha1",
    kind = "ServiceEntry",
    plural = "serviceentries",
    namespaced,
    derive = "Default",
    printcolumn = r#"{"name":"Hosts","type":"string","jsonPath":".spec.hosts"}"#,
    printcolumn = r#"{"name":"Resolution","type":"string","jsonPath":".spec.resolution"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntrySpec {
    /// Hostnames associated with the entry. Each host becomes one service.
    pub hosts: Vec<String>,

    /// Virtual IP addresses or CIDR blocks associated with the hosts
    #[serde(default)]
    pub addresses: Vec<String>,

    /// Ports exposed by the service
    #[serde(default)]
    pub ports: Vec<ServicePort>,

    /// Whether the service is part of the mesh or external to it
    #[serde(default)]
    pub location: Location,

    /// How the addresses of the service endpoints are resolved
    #[serde(default)]
    pub resolution: Resolution,

    /// Endpoints implementing the service
    #[serde(default)]
    pub endpoints: Vec<WorkloadEndpoint>,
}

/// A named port on a service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServicePort {
    /// Port number (1-65535)
    pub number: u32,

    /// Protocol: HTTP, HTTPS, HTTP2, GRPC, TCP, TLS, ...
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Port name, referenced by endpoint port overrides
    pub name: String,
}

/// A network-reachable workload implementing a ServiceEntry
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkloadEndpoint {
    /// IP address or hostname of the workload
    pub address: String,

    /// Per-port overrides keyed by service port name
    #[serde(default)]
    pub ports: BTreeMap<String, u32>,

    /// Labels used for subset selection
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    #[default]
    MeshExternal,
    MeshInternal,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    #[default]
    None,
    Static,
    Dns,
}

fn default_protocol() -> String {
    "HTTP".to_string()
}
