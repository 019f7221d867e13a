//! Registry API types and CRDs for Kubernetes integration
//!
//! This library defines the raw configuration records consumed by the
//! service registry:
//! - ServiceEntry: Declaratively configured services and their endpoints
//! - ConfigRecord: Kind-tagged record as held by a configuration store

pub mod record;
pub mod v1alpha1;

pub use record::{ConfigRecord, ConfigSpec, Event, RecordKind};
pub use v1alpha1::{Location, Resolution, ServiceEntry, ServiceEntrySpec, ServicePort, WorkloadEndpoint};
