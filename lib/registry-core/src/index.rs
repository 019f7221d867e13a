//! Staleness-gated index of instances by hostname and by address

use crate::convert::Converter;
use crate::metrics::RegistryMetrics;
use crate::model::Instance;
use crate::store::ConfigStore;
use chrono::{DateTime, Utc};
use registry_api::RecordKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

type InstanceMap = HashMap<String, Vec<Arc<Instance>>>;

/// Summary of the current index snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub services: usize,
    pub addresses: usize,
    pub instances: usize,
    pub stale: bool,
}

#[derive(Default)]
struct IndexState {
    by_service: InstanceMap,
    by_address: InstanceMap,
    stale: bool,
    last_change: Option<DateTime<Utc>>,
    last_rebuild: Option<DateTime<Utc>>,
}

/// RegistryIndex derives two lookup tables from the records of one kind.
///
/// Both tables and the staleness flag sit behind a single lock. Changes only
/// mark the index stale; the next lookup rebuilds both tables from the full
/// source listing and swaps them in together.
pub struct RegistryIndex {
    kind: RecordKind,
    source: Arc<dyn ConfigStore>,
    converter: Arc<dyn Converter>,
    metrics: Arc<RegistryMetrics>,
    state: RwLock<IndexState>,
}

impl RegistryIndex {
    /// Create an empty index. It starts stale, so the first lookup builds it.
    pub fn new(
        kind: RecordKind,
        source: Arc<dyn ConfigStore>,
        converter: Arc<dyn Converter>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            kind,
            source,
            converter,
            metrics,
            state: RwLock::new(IndexState {
                stale: true,
                ..Default::default()
            }),
        }
    }

    /// Record that the source changed since the last rebuild
    pub async fn mark_stale(&self) {
        let mut state = self.state.write().await;
        state.stale = true;
        state.last_change = Some(Utc::now());
    }

    pub async fn is_stale(&self) -> bool {
        self.state.read().await.stale
    }

    /// Rebuild the index if it is stale. Returns true if this call rebuilt it.
    pub async fn ensure_fresh(&self) -> bool {
        {
            let state = self.state.read().await;
            if !state.stale {
                return false;
            }
        }

        let mut state = self.state.write().await;
        // Another caller may have rebuilt while we waited for the write lock
        if !state.stale {
            return false;
        }

        let timer = self.metrics.rebuild_duration_seconds.start_timer();
        let (by_service, by_address, count) = self.build().await;
        state.by_service = by_service;
        state.by_address = by_address;
        state.stale = false;
        state.last_rebuild = Some(Utc::now());
        timer.observe_duration();

        self.metrics.rebuilds_total.inc();
        self.metrics.indexed_instances.set(count as i64);
        debug!(
            "Rebuilt {} index: {} hosts, {} addresses, {} instances",
            self.kind,
            state.by_service.len(),
            state.by_address.len(),
            count
        );
        true
    }

    async fn build(&self) -> (InstanceMap, InstanceMap, usize) {
        let mut by_service = InstanceMap::new();
        let mut by_address = InstanceMap::new();
        let mut count = 0;

        for record in self.source.list(self.kind).await {
            let instances = match self.converter.to_instances(&record) {
                Ok(instances) => instances,
                Err(e) => {
                    warn!("Skipping malformed config record {}: {}", record.key(), e);
                    self.metrics
                        .malformed_records_total
                        .with_label_values(&[self.kind.as_str()])
                        .inc();
                    continue;
                }
            };

            for instance in instances {
                let instance = Arc::new(instance);
                by_service
                    .entry(instance.hostname().to_string())
                    .or_default()
                    .push(instance.clone());
                by_address
                    .entry(instance.endpoint.address.clone())
                    .or_default()
                    .push(instance);
                count += 1;
            }
        }

        (by_service, by_address, count)
    }

    /// Instances of a hostname from a fresh snapshot
    pub async fn instances_for_service(&self, hostname: &str) -> Vec<Arc<Instance>> {
        self.ensure_fresh().await;
        let state = self.state.read().await;
        state.by_service.get(hostname).cloned().unwrap_or_default()
    }

    /// Instances at an endpoint address from a fresh snapshot
    pub async fn instances_for_address(&self, address: &str) -> Vec<Arc<Instance>> {
        self.ensure_fresh().await;
        let state = self.state.read().await;
        state.by_address.get(address).cloned().unwrap_or_default()
    }

    pub async fn stats(&self) -> IndexStats {
        self.ensure_fresh().await;
        let state = self.state.read().await;
        IndexStats {
            services: state.by_service.len(),
            addresses: state.by_address.len(),
            instances: state.by_service.values().map(Vec::len).sum(),
            stale: state.stale,
        }
    }

    /// Time of the last change notification, if any
    pub async fn last_change(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_change
    }

    /// Time of the last completed rebuild, if any
    pub async fn last_rebuild(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_rebuild
    }
}
