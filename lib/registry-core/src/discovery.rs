//! Service discovery over ServiceEntry records

use crate::convert::{Converter, ServiceEntryConverter};
use crate::handlers::{HandlerRegistry, InstanceHandler, ServiceHandler};
use crate::index::{IndexStats, RegistryIndex};
use crate::metrics::RegistryMetrics;
use crate::model::{Instance, Labels, Port, Service, ServiceAttributes};
use crate::store::{ConfigStore, ConfigStoreCache};
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use registry_api::{ConfigRecord, Event, RecordKind};
use std::sync::Arc;
use tracing::{debug, warn};

/// ServiceEntryDiscovery resolves hostnames and proxy addresses to instances
/// declared by ServiceEntry records, and forwards record changes to service
/// and instance subscribers.
///
/// Listing and attribute lookups always read the store directly. Port and
/// address lookups go through the staleness-gated [`RegistryIndex`].
pub struct ServiceEntryDiscovery {
    store: Arc<dyn ConfigStore>,
    converter: Arc<dyn Converter>,
    index: RegistryIndex,
    handlers: HandlerRegistry,
    metrics: Arc<RegistryMetrics>,
}

impl ServiceEntryDiscovery {
    const KIND: RecordKind = RecordKind::ServiceEntry;

    /// Create a discovery bound to `store`, using the ServiceEntry converter
    pub async fn new<S>(store: Arc<S>, metrics: Arc<RegistryMetrics>) -> Arc<Self>
    where
        S: ConfigStoreCache + 'static,
    {
        Self::with_converter(store, Arc::new(ServiceEntryConverter), metrics).await
    }

    /// Create a discovery with a custom converter.
    ///
    /// The store only holds a weak reference back to the discovery, so
    /// dropping the returned handle tears the discovery down.
    pub async fn with_converter<S>(
        store: Arc<S>,
        converter: Arc<dyn Converter>,
        metrics: Arc<RegistryMetrics>,
    ) -> Arc<Self>
    where
        S: ConfigStoreCache + 'static,
    {
        let source: Arc<dyn ConfigStore> = store.clone();
        let discovery = Arc::new(Self {
            store: source.clone(),
            converter: converter.clone(),
            index: RegistryIndex::new(Self::KIND, source, converter, metrics.clone()),
            handlers: HandlerRegistry::new(),
            metrics,
        });

        let weak = Arc::downgrade(&discovery);
        store
            .register_event_handler(
                Self::KIND,
                Arc::new(move |record: ConfigRecord, event: Event| {
                    let weak = weak.clone();
                    async move {
                        if let Some(discovery) = weak.upgrade() {
                            discovery.on_source_change(record, event).await;
                        }
                    }
                    .boxed()
                }),
            )
            .await;

        discovery
    }

    /// Subscribe to service-level change events
    pub async fn subscribe_services(&self, handler: ServiceHandler) {
        self.handlers.append_service_handler(handler).await;
    }

    /// Subscribe to instance-level change events
    pub async fn subscribe_instances(&self, handler: InstanceHandler) {
        self.handlers.append_instance_handler(handler).await;
    }

    /// Handle a change reported by the store.
    ///
    /// Marks the index stale, then hands every (subscriber, entity) pair to
    /// its own task. Returns once the tasks are spawned, without waiting for
    /// any of them.
    pub async fn on_source_change(&self, record: ConfigRecord, event: Event) {
        debug!("Config {} {}: {}", record.kind(), event, record.key());
        self.metrics
            .config_events_total
            .with_label_values(&[record.kind().as_str(), event.as_str()])
            .inc();

        self.index.mark_stale().await;

        match self.converter.to_services(&record) {
            Ok(services) => {
                let services: Vec<Arc<Service>> = services.into_iter().map(Arc::new).collect();
                let spawned = self.handlers.dispatch_services(&services, event).await;
                self.metrics
                    .handler_dispatches_total
                    .with_label_values(&["service"])
                    .inc_by(spawned as f64);
                debug!("Dispatched {} service events for {}", spawned, record.key());
            }
            Err(e) => self.skip_malformed(&record, &e),
        }

        match self.converter.to_instances(&record) {
            Ok(instances) => {
                let instances: Vec<Arc<Instance>> = instances.into_iter().map(Arc::new).collect();
                let spawned = self.handlers.dispatch_instances(&instances, event).await;
                self.metrics
                    .handler_dispatches_total
                    .with_label_values(&["instance"])
                    .inc_by(spawned as f64);
                debug!("Dispatched {} instance events for {}", spawned, record.key());
            }
            Err(e) => self.skip_malformed(&record, &e),
        }
    }

    fn skip_malformed(&self, record: &ConfigRecord, error: &CoreError) {
        warn!("Skipping malformed config record {}: {}", record.key(), error);
        self.metrics
            .malformed_records_total
            .with_label_values(&[record.kind().as_str()])
            .inc();
    }

    /// Rebuild the index if a change was observed since the last rebuild
    pub async fn ensure_fresh(&self) -> bool {
        self.index.ensure_fresh().await
    }

    /// List all services, converted from the current store contents
    pub async fn list_services(&self) -> Vec<Service> {
        let mut services = Vec::new();
        for record in self.store.list(Self::KIND).await {
            match self.converter.to_services(&record) {
                Ok(converted) => services.extend(converted),
                Err(e) => self.skip_malformed(&record, &e),
            }
        }
        services
    }

    /// Get a service by hostname, if it exists
    pub async fn get_service(&self, hostname: &str) -> Option<Service> {
        self.list_services()
            .await
            .into_iter()
            .find(|s| s.hostname == hostname)
    }

    /// Get the attributes of a service. Unlike [`Self::get_service`], an
    /// unknown hostname is an error.
    pub async fn get_service_attributes(&self, hostname: &str) -> Result<ServiceAttributes> {
        self.get_service(hostname)
            .await
            .map(|s| s.attributes)
            .ok_or_else(|| CoreError::ServiceNotFound(hostname.to_string()))
    }

    /// Instances of a hostname whose service port name is in `port_names`
    /// (all ports if empty) and whose labels contain `labels`.
    ///
    /// Reads the store directly rather than the index.
    pub async fn instances_by_name_and_labels(
        &self,
        hostname: &str,
        port_names: &[&str],
        labels: &Labels,
    ) -> Vec<Arc<Instance>> {
        let mut out = Vec::new();
        for record in self.store.list(Self::KIND).await {
            let instances = match self.converter.to_instances(&record) {
                Ok(instances) => instances,
                Err(e) => {
                    self.skip_malformed(&record, &e);
                    continue;
                }
            };
            out.extend(
                instances
                    .into_iter()
                    .filter(|i| {
                        i.hostname() == hostname
                            && labels.is_subset_of(&i.labels)
                            && port_name_matches(i, port_names)
                    })
                    .map(Arc::new),
            );
        }
        out
    }

    /// Instances of a hostname on a service port (0 for any port) whose
    /// labels contain `labels`
    pub async fn instances_by_port(
        &self,
        hostname: &str,
        port: u16,
        labels: &Labels,
    ) -> Vec<Arc<Instance>> {
        self.index
            .instances_for_service(hostname)
            .await
            .into_iter()
            .filter(|i| {
                i.hostname() == hostname
                    && labels.is_subset_of(&i.labels)
                    && port_number_matches(i, port)
            })
            .collect()
    }

    /// Instances co-located with a proxy at `address`
    pub async fn instances_for_address(&self, address: &str) -> Vec<Arc<Instance>> {
        self.index.instances_for_address(address).await
    }

    /// Health check ports of the instance at `address`. ServiceEntry
    /// instances are not managed by the mesh, so there are none.
    pub fn management_ports(&self, _address: &str) -> Vec<Port> {
        Vec::new()
    }

    /// ServiceEntries carry no workload identity.
    pub fn service_accounts(&self, _hostname: &str, _ports: &[&str]) -> Vec<String> {
        Vec::new()
    }

    pub async fn stats(&self) -> IndexStats {
        self.index.stats().await
    }

    pub async fn last_change(&self) -> Option<DateTime<Utc>> {
        self.index.last_change().await
    }

    pub fn index(&self) -> &RegistryIndex {
        &self.index
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }
}

fn port_name_matches(instance: &Instance, port_names: &[&str]) -> bool {
    port_names.is_empty() || port_names.contains(&instance.endpoint.service_port.name.as_str())
}

fn port_number_matches(instance: &Instance, port: u16) -> bool {
    port == 0 || instance.endpoint.service_port.port == port
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConfigStore;
    use registry_api::{Resolution, ServiceEntrySpec, ServicePort, WorkloadEndpoint};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn port(name: &str, number: u32) -> ServicePort {
        ServicePort {
            number,
            protocol: "HTTP".to_string(),
            name: name.to_string(),
        }
    }

    fn endpoint(address: &str, labels: &[(&str, &str)]) -> WorkloadEndpoint {
        WorkloadEndpoint {
            address: address.to_string(),
            ports: BTreeMap::new(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn entry(name: &str, host: &str, ports: Vec<ServicePort>, endpoints: Vec<WorkloadEndpoint>) -> ConfigRecord {
        ConfigRecord::service_entry(
            "default",
            name,
            ServiceEntrySpec {
                hosts: vec![host.to_string()],
                ports,
                resolution: Resolution::Static,
                endpoints,
                ..Default::default()
            },
        )
    }

    async fn setup() -> (Arc<MemoryConfigStore>, Arc<ServiceEntryDiscovery>) {
        let store = Arc::new(MemoryConfigStore::new());
        let metrics = Arc::new(RegistryMetrics::new().expect("Failed to create metrics"));
        let discovery = ServiceEntryDiscovery::new(store.clone(), metrics).await;
        (store, discovery)
    }

    fn s1() -> ConfigRecord {
        entry(
            "r",
            "s1.example",
            vec![port("http", 8080)],
            vec![endpoint("10.0.0.1", &[("env", "prod")])],
        )
    }

    #[tokio::test]
    async fn test_single_record_end_to_end() {
        let (store, discovery) = setup().await;
        store.create(s1()).await.unwrap();

        let hosts: Vec<String> = discovery
            .list_services()
            .await
            .into_iter()
            .map(|s| s.hostname)
            .collect();
        assert_eq!(hosts, vec!["s1.example".to_string()]);

        let prod = discovery
            .instances_by_port("s1.example", 8080, &Labels::new().with("env", "prod"))
            .await;
        assert_eq!(prod.len(), 1);
        assert_eq!(prod[0].endpoint.address, "10.0.0.1");
        assert_eq!(prod[0].endpoint.port, 8080);

        let dev = discovery
            .instances_by_port("s1.example", 8080, &Labels::new().with("env", "dev"))
            .await;
        assert!(dev.is_empty());

        store.delete(RecordKind::ServiceEntry, "default", "r").await.unwrap();
        assert!(discovery
            .instances_by_port("s1.example", 0, &Labels::new())
            .await
            .is_empty());
        assert!(discovery.instances_for_address("10.0.0.1").await.is_empty());
        assert!(discovery.list_services().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_vs_missing_attributes() {
        let (store, discovery) = setup().await;
        store.create(s1()).await.unwrap();

        assert!(discovery.get_service("unknown.example").await.is_none());
        assert!(matches!(
            discovery.get_service_attributes("unknown.example").await,
            Err(CoreError::ServiceNotFound(host)) if host == "unknown.example"
        ));

        let service = discovery.get_service("s1.example").await.expect("service exists");
        assert_eq!(service.ports[0].port, 8080);
        let attributes = discovery.get_service_attributes("s1.example").await.unwrap();
        assert_eq!(
            attributes,
            ServiceAttributes {
                name: "s1.example".to_string(),
                namespace: "default".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_port_zero_matches_every_port() {
        let (store, discovery) = setup().await;
        store
            .create(entry(
                "multi",
                "multi.example",
                vec![port("http", 80), port("grpc", 9090)],
                vec![endpoint("10.0.0.5", &[]), endpoint("10.0.0.6", &[])],
            ))
            .await
            .unwrap();
        store.create(s1()).await.unwrap();

        let all = discovery.instances_by_port("multi.example", 0, &Labels::new()).await;
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|i| i.hostname() == "multi.example"));

        let grpc = discovery.instances_by_port("multi.example", 9090, &Labels::new()).await;
        assert_eq!(grpc.len(), 2);
        assert!(discovery
            .instances_by_port("multi.example", 443, &Labels::new())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_instances_by_name_and_labels() {
        let (store, discovery) = setup().await;
        store
            .create(entry(
                "multi",
                "multi.example",
                vec![port("http", 80), port("grpc", 9090)],
                vec![
                    endpoint("10.0.0.5", &[("env", "prod")]),
                    endpoint("10.0.0.6", &[("env", "dev")]),
                ],
            ))
            .await
            .unwrap();

        let all = discovery
            .instances_by_name_and_labels("multi.example", &[], &Labels::new())
            .await;
        assert_eq!(all.len(), 4);

        let grpc_prod = discovery
            .instances_by_name_and_labels("multi.example", &["grpc"], &Labels::new().with("env", "prod"))
            .await;
        assert_eq!(grpc_prod.len(), 1);
        assert_eq!(grpc_prod[0].endpoint.address, "10.0.0.5");
        assert_eq!(grpc_prod[0].endpoint.service_port.name, "grpc");

        assert!(discovery
            .instances_by_name_and_labels("multi.example", &["https"], &Labels::new())
            .await
            .is_empty());
        assert!(discovery
            .instances_by_name_and_labels("other.example", &[], &Labels::new())
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_backend_has_no_ports_or_accounts() {
        let (store, discovery) = setup().await;
        store.create(s1()).await.unwrap();
        assert!(discovery.management_ports("10.0.0.1").is_empty());
        assert!(discovery.service_accounts("s1.example", &["http"]).is_empty());
        assert_eq!(discovery.instances_for_address("10.0.0.1").await.len(), 1);
        assert!(discovery.instances_for_address("10.9.9.9").await.is_empty());
    }

    #[tokio::test]
    async fn test_update_dispatches_only_changed_record() {
        let (store, discovery) = setup().await;
        let a = entry("a", "a.example", vec![port("http", 80)], vec![endpoint("10.0.1.1", &[]), endpoint("10.0.1.2", &[])]);
        let b = entry("b", "b.example", vec![port("http", 80)], vec![endpoint("10.0.2.1", &[])]);
        store.create(a.clone()).await.unwrap();
        store.create(b).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        discovery
            .subscribe_instances(Arc::new(move |instance: Arc<Instance>, event: Event| {
                let _ = tx.send((instance.hostname().to_string(), instance.endpoint.address.clone(), event));
            }))
            .await;

        store.update(a).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let item = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("instance handler was not invoked")
                .expect("channel closed");
            seen.push(item);
        }
        seen.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            seen,
            vec![
                ("a.example".to_string(), "10.0.1.1".to_string(), Event::Updated),
                ("a.example".to_string(), "10.0.1.2".to_string(), Event::Updated),
            ]
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_service_subscribers_receive_events() {
        let (store, discovery) = setup().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        discovery
            .subscribe_services(Arc::new(move |service: Arc<Service>, event: Event| {
                let _ = tx.send((service.hostname.clone(), event));
            }))
            .await;

        store.create(s1()).await.unwrap();
        let item = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(item, ("s1.example".to_string(), Event::Added));

        store.delete(RecordKind::ServiceEntry, "default", "r").await.unwrap();
        let item = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(item, ("s1.example".to_string(), Event::Deleted));
        assert!(discovery.last_change().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_notifier_does_not_wait_for_handlers() {
        let (store, discovery) = setup().await;
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        discovery
            .subscribe_services(Arc::new(move |_: Arc<Service>, _: Event| {
                std::thread::sleep(Duration::from_millis(300));
                flag.store(true, Ordering::SeqCst);
            }))
            .await;

        store.create(s1()).await.unwrap();
        assert!(!done.load(Ordering::SeqCst));
        assert!(discovery.index().is_stale().await);
    }

    #[tokio::test]
    async fn test_malformed_change_still_marks_stale() {
        let (store, discovery) = setup().await;
        store.create(s1()).await.unwrap();
        discovery.ensure_fresh().await;

        store
            .create(ConfigRecord::service_entry("default", "broken", ServiceEntrySpec::default()))
            .await
            .unwrap();
        assert!(discovery.index().is_stale().await);
        assert_eq!(discovery.list_services().await.len(), 1);
        assert_eq!(
            discovery.instances_by_port("s1.example", 8080, &Labels::new()).await.len(),
            1
        );
    }

    async fn expected_instances(store: &MemoryConfigStore, hostname: &str) -> Vec<Arc<Instance>> {
        let mut expected = Vec::new();
        for record in store.list(RecordKind::ServiceEntry).await {
            for instance in ServiceEntryConverter.to_instances(&record).unwrap() {
                if instance.hostname() == hostname {
                    expected.push(Arc::new(instance));
                }
            }
        }
        expected
    }

    #[tokio::test]
    async fn test_cached_queries_match_full_rebuild() {
        let (store, discovery) = setup().await;
        let host = "shared.example";

        store
            .create(entry("a", host, vec![port("http", 80)], vec![endpoint("10.1.0.1", &[])]))
            .await
            .unwrap();
        let cached = discovery.instances_by_port(host, 0, &Labels::new()).await;
        assert_eq!(cached, expected_instances(&store, host).await);

        store
            .create(entry("b", host, vec![port("http", 80)], vec![endpoint("10.1.0.2", &[("v", "2")])]))
            .await
            .unwrap();
        let cached = discovery.instances_by_port(host, 0, &Labels::new()).await;
        assert_eq!(cached.len(), 2);
        assert_eq!(cached, expected_instances(&store, host).await);

        store
            .update(entry("a", host, vec![port("grpc", 90)], vec![endpoint("10.1.0.3", &[])]))
            .await
            .unwrap();
        store.delete(RecordKind::ServiceEntry, "default", "b").await.unwrap();
        let cached = discovery.instances_by_port(host, 0, &Labels::new()).await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].endpoint.service_port.port, 90);
        assert_eq!(cached, expected_instances(&store, host).await);
        assert!(discovery.instances_for_address("10.1.0.1").await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_discovery_ignores_events() {
        let (store, discovery) = setup().await;
        drop(discovery);
        store.create(s1()).await.unwrap();
        assert_eq!(store.list(RecordKind::ServiceEntry).await.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_during_changes() {
        let (store, discovery) = setup().await;

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    let record = entry(
                        &format!("e{}", i),
                        "load.example",
                        vec![port("http", 80)],
                        vec![endpoint(&format!("10.2.0.{}", i), &[])],
                    );
                    store.create(record).await.unwrap();
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let discovery = discovery.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let instances = discovery.instances_by_port("load.example", 0, &Labels::new()).await;
                        for instance in &instances {
                            let by_address = discovery.instances_for_address(&instance.endpoint.address).await;
                            assert!(by_address.len() <= 1);
                        }
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(
            discovery.instances_by_port("load.example", 0, &Labels::new()).await.len(),
            20
        );
    }
}
