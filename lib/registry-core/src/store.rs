//! Configuration store boundary and an in-memory implementation

use crate::{CoreError, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use registry_api::{ConfigRecord, Event, RecordKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Callback invoked by a store for every change to a record of a given kind
pub type EventHandler = Arc<dyn Fn(ConfigRecord, Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Read access to the raw records of a configuration store
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Current records of `kind`, ordered by namespace then name
    async fn list(&self, kind: RecordKind) -> Vec<ConfigRecord>;
}

/// A configuration store that reports changes
#[async_trait]
pub trait ConfigStoreCache: ConfigStore {
    async fn register_event_handler(&self, kind: RecordKind, handler: EventHandler);
}

/// Counts of the changes applied by [`MemoryConfigStore::sync`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl SyncSummary {
    pub fn changed(&self) -> usize {
        self.added + self.updated + self.deleted
    }
}

/// In-memory configuration store
///
/// Handlers are notified after the record map has been updated and its lock
/// released, in registration order.
#[derive(Default)]
pub struct MemoryConfigStore {
    records: RwLock<HashMap<RecordKind, BTreeMap<String, ConfigRecord>>>,
    handlers: RwLock<HashMap<RecordKind, Vec<EventHandler>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a single record
    pub async fn get(&self, kind: RecordKind, namespace: &str, name: &str) -> Option<ConfigRecord> {
        let records = self.records.read().await;
        records
            .get(&kind)
            .and_then(|by_key| by_key.get(&format!("{}/{}", namespace, name)))
            .cloned()
    }

    /// Add a new record
    pub async fn create(&self, record: ConfigRecord) -> Result<()> {
        let key = record.key();
        {
            let mut records = self.records.write().await;
            let by_key = records.entry(record.kind()).or_default();
            if by_key.contains_key(&key) {
                return Err(CoreError::AlreadyExists(key));
            }
            by_key.insert(key.clone(), record.clone());
        }

        debug!("Created config record: {}", key);
        self.notify(record, Event::Added).await;
        Ok(())
    }

    /// Replace an existing record
    pub async fn update(&self, record: ConfigRecord) -> Result<()> {
        let key = record.key();
        {
            let mut records = self.records.write().await;
            match records.get_mut(&record.kind()).and_then(|by_key| by_key.get_mut(&key)) {
                Some(existing) => *existing = record.clone(),
                None => return Err(CoreError::RecordNotFound(key)),
            }
        }

        debug!("Updated config record: {}", key);
        self.notify(record, Event::Updated).await;
        Ok(())
    }

    /// Remove a record, returning it
    pub async fn delete(&self, kind: RecordKind, namespace: &str, name: &str) -> Result<ConfigRecord> {
        let key = format!("{}/{}", namespace, name);
        let removed = {
            let mut records = self.records.write().await;
            records
                .get_mut(&kind)
                .and_then(|by_key| by_key.remove(&key))
                .ok_or_else(|| CoreError::RecordNotFound(key.clone()))?
        };

        debug!("Deleted config record: {}", key);
        self.notify(removed.clone(), Event::Deleted).await;
        Ok(removed)
    }

    /// Replace every record of `kind` with `desired`, notifying only for
    /// records that were added, changed or removed
    pub async fn sync(&self, kind: RecordKind, desired: Vec<ConfigRecord>) -> Result<SyncSummary> {
        if let Some(other) = desired.iter().find(|r| r.kind() != kind) {
            return Err(CoreError::InvalidConfiguration(format!(
                "record {} is a {}, expected {}",
                other.key(),
                other.kind(),
                kind
            )));
        }

        let desired: BTreeMap<String, ConfigRecord> =
            desired.into_iter().map(|r| (r.key(), r)).collect();

        let mut summary = SyncSummary::default();
        let mut events = Vec::new();
        {
            let mut records = self.records.write().await;
            let current = records.remove(&kind).unwrap_or_default();

            for (key, record) in &desired {
                match current.get(key) {
                    None => {
                        summary.added += 1;
                        events.push((record.clone(), Event::Added));
                    }
                    Some(existing) if existing != record => {
                        summary.updated += 1;
                        events.push((record.clone(), Event::Updated));
                    }
                    Some(_) => summary.unchanged += 1,
                }
            }
            for (key, record) in current {
                if !desired.contains_key(&key) {
                    summary.deleted += 1;
                    events.push((record, Event::Deleted));
                }
            }

            records.insert(kind, desired);
        }

        debug!(
            "Synced {} records: {} added, {} updated, {} deleted",
            kind, summary.added, summary.updated, summary.deleted
        );
        for (record, event) in events {
            self.notify(record, event).await;
        }
        Ok(summary)
    }

    async fn notify(&self, record: ConfigRecord, event: Event) {
        let handlers = {
            let handlers = self.handlers.read().await;
            handlers.get(&record.kind()).cloned().unwrap_or_default()
        };
        for handler in handlers {
            handler(record.clone(), event).await;
        }
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn list(&self, kind: RecordKind) -> Vec<ConfigRecord> {
        let records = self.records.read().await;
        records
            .get(&kind)
            .map(|by_key| by_key.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ConfigStoreCache for MemoryConfigStore {
    async fn register_event_handler(&self, kind: RecordKind, handler: EventHandler) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(kind).or_default().push(handler);
    }
}
