use anyhow::Result;
use registry_api::{Event, RecordKind};
use registry_core::{
    Instance, MemoryConfigStore, RegistryMetrics, Service, ServiceEntryDiscovery, SyncSummary,
};
use std::sync::Arc;
use tracing::{debug, error, info, trace, Level};
use tracing_subscriber::fmt::init as tracing_init;

mod config;
mod manifests;

use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    info!("Starting registry-daemon...");

    let config = DaemonConfig::from_env()?;
    info!(
        "Loading ServiceEntries from {} every {:?}",
        config.manifest_path.display(),
        config.resync_interval
    );

    let metrics = Arc::new(RegistryMetrics::new()?);
    let store = Arc::new(MemoryConfigStore::new());
    let discovery = ServiceEntryDiscovery::new(store.clone(), metrics).await;
    info!("Service discovery initialized");

    discovery
        .subscribe_services(Arc::new(|service: Arc<Service>, event: Event| {
            info!(
                "Service {} {} (namespace {})",
                service.hostname, event, service.attributes.namespace
            );
        }))
        .await;
    discovery
        .subscribe_instances(Arc::new(|instance: Arc<Instance>, event: Event| {
            debug!(
                "Instance {} at {}:{} {}",
                instance.hostname(),
                instance.endpoint.address,
                instance.endpoint.port,
                event
            );
        }))
        .await;

    // Periodic resync loop
    let mut ticker = tokio::time::interval(config.resync_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match resync(&config, &store, &discovery).await {
                    Ok(summary) => {
                        if summary.changed() > 0 {
                            info!(
                                "Synced ServiceEntries: {} added, {} updated, {} deleted",
                                summary.added, summary.updated, summary.deleted
                            );
                        }
                    }
                    Err(e) => {
                        error!("Error syncing ServiceEntries: {:#}", e);
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown signal received, exiting...");
                break;
            }
        }
    }

    Ok(())
}

async fn resync(
    config: &DaemonConfig,
    store: &MemoryConfigStore,
    discovery: &ServiceEntryDiscovery,
) -> Result<SyncSummary> {
    let records =
        manifests::load_service_entries(&config.manifest_path, &config.default_namespace).await?;
    debug!("Found {} ServiceEntries", records.len());

    let summary = store.sync(RecordKind::ServiceEntry, records).await?;

    // Log current registry state
    let stats = discovery.stats().await;
    debug!(
        "Registry index has {} hosts, {} addresses, {} instances",
        stats.services, stats.addresses, stats.instances
    );
    if tracing::enabled!(Level::TRACE) {
        trace!("Registry metrics:\n{}", discovery.metrics().gather()?);
    }

    Ok(summary)
}
