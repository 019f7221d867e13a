//! Derived service registry built from declarative ServiceEntry records
//!
//! This library provides:
//! - Conversion of raw records into services and instances
//! - A staleness-gated index of instances by hostname and by address
//! - Fan-out of per-service and per-instance change events to subscribers
//! - The query surface used to resolve hostnames and proxy addresses

pub mod convert;
pub mod discovery;
pub mod error;
pub mod handlers;
pub mod index;
pub mod metrics;
pub mod model;
pub mod store;

pub use convert::{Converter, ServiceEntryConverter};
pub use discovery::ServiceEntryDiscovery;
pub use error::{CoreError, Result};
pub use handlers::{HandlerRegistry, InstanceHandler, ServiceHandler};
pub use index::{IndexStats, RegistryIndex};
pub use metrics::RegistryMetrics;
pub use model::{Endpoint, Instance, Labels, Port, Service, ServiceAttributes};
pub use store::{ConfigStore, ConfigStoreCache, EventHandler, MemoryConfigStore, SyncSummary};
