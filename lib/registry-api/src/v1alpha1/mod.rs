/// API version v1alpha1 for registry CRDs

pub mod service_entry;

pub use service_entry::{
    Location, Resolution, ServiceEntry, ServiceEntrySpec, ServicePort, WorkloadEndpoint,
};

/// API group for registry resources
pub const API_GROUP: &str = "registry.datum.net";
/// API version for registry resources
pub const API_VERSION: &str = "v1alpha1";
