//! Kind-tagged configuration records as held by a configuration store

use crate::v1alpha1::{ServiceEntry, ServiceEntrySpec};
use kube::ResourceExt;
use std::fmt;

/// Kind of a raw configuration record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    ServiceEntry,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ServiceEntry => "service-entry",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change observed on a configuration record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Added,
    Updated,
    Deleted,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Added => "added",
            Event::Updated => "updated",
            Event::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of a configuration record
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigSpec {
    ServiceEntry(ServiceEntrySpec),
}

/// A configuration entry prior to domain conversion
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigRecord {
    pub name: String,
    pub namespace: String,
    pub spec: ConfigSpec,
}

impl ConfigRecord {
    pub fn service_entry(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: ServiceEntrySpec,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec: ConfigSpec::ServiceEntry(spec),
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self.spec {
            ConfigSpec::ServiceEntry(_) => RecordKind::ServiceEntry,
        }
    }

    /// Store key: namespace/name
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl From<ServiceEntry> for ConfigRecord {
    fn from(entry: ServiceEntry) -> Self {
        let name = entry.name_any();
        let namespace = entry.namespace().unwrap_or_else(|| "default".to_string());
        Self::service_entry(namespace, name, entry.spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_service_entry() {
        let mut entry = ServiceEntry::new(
            "payments",
            ServiceEntrySpec {
                hosts: vec!["payments.example".to_string()],
                ..Default::default()
            },
        );
        let record = ConfigRecord::from(entry.clone());
        assert_eq!(record.namespace, "default");
        assert_eq!(record.key(), "default/payments");
        assert_eq!(record.kind(), RecordKind::ServiceEntry);

        entry.metadata.namespace = Some("billing".to_string());
        let record = ConfigRecord::from(entry);
        assert_eq!(record.key(), "billing/payments");
    }

    #[test]
    fn test_display() {
        assert_eq!(Event::Deleted.to_string(), "deleted");
        assert_eq!(RecordKind::ServiceEntry.to_string(), "service-entry");
    }
}
