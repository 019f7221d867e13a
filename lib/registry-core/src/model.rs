//! Services, instances and the values they carry

use registry_api::Resolution;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named port on a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

/// Custom attributes of a service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttributes {
    pub name: String,
    pub namespace: String,
}

/// A logical destination identified by its hostname
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub hostname: String,
    pub addresses: Vec<String>,
    pub ports: Vec<Port>,
    pub resolution: Resolution,
    pub mesh_external: bool,
    pub attributes: ServiceAttributes,
}

impl Service {
    pub fn port_by_name(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.name == name)
    }
}

/// Network address and port information of an instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
    pub service_port: Port,
}

/// One concrete endpoint implementing a service.
///
/// The service is shared with every other instance converted from the same
/// host; it is re-derived on each conversion and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub service: Arc<Service>,
    pub endpoint: Endpoint,
    pub labels: Labels,
}

impl Instance {
    pub fn hostname(&self) -> &str {
        &self.service.hostname
    }
}

/// Unordered label set used for subset selection
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if every key of `self` is present in `other` with an equal value.
    /// Keys and values compare as exact, case-sensitive strings; an empty set
    /// is a subset of everything.
    pub fn is_subset_of(&self, other: &Labels) -> bool {
        self.0
            .iter()
            .all(|(key, value)| other.0.get(key) == Some(value))
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Labels {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_labels_match_everything() {
        let instance_labels = Labels::new().with("env", "prod");
        assert!(Labels::new().is_subset_of(&instance_labels));
        assert!(Labels::new().is_subset_of(&Labels::new()));
    }

    #[test]
    fn test_subset_requires_equal_values() {
        let instance_labels: Labels = [("env", "prod"), ("tier", "web")].into_iter().collect();
        assert!(Labels::new().with("env", "prod").is_subset_of(&instance_labels));
        assert!(instance_labels.is_subset_of(&instance_labels));
        assert!(!Labels::new().with("env", "dev").is_subset_of(&instance_labels));
        assert!(!Labels::new().with("zone", "a").is_subset_of(&instance_labels));
        assert!(!instance_labels.is_subset_of(&Labels::new().with("env", "prod")));
    }

    #[test]
    fn test_subset_is_case_sensitive() {
        let instance_labels = Labels::new().with("env", "prod");
        assert!(!Labels::new().with("env", "Prod").is_subset_of(&instance_labels));
        assert!(!Labels::new().with("Env", "prod").is_subset_of(&instance_labels));
    }
}
