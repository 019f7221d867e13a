//! Prometheus metrics for the registry index and event fan-out

use crate::{CoreError, Result};
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics collector for the service registry
#[derive(Clone)]
pub struct RegistryMetrics {
    /// Change notifications received, by record kind and event
    pub config_events_total: CounterVec,
    /// Completed index rebuilds
    pub rebuilds_total: Counter,
    /// Index rebuild duration in seconds
    pub rebuild_duration_seconds: Histogram,
    /// Records skipped because conversion failed
    pub malformed_records_total: CounterVec,
    /// Handler invocations handed to the runtime, by entity
    pub handler_dispatches_total: CounterVec,
    /// Instances held by the last rebuilt index
    pub indexed_instances: IntGauge,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl RegistryMetrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let config_events_total = CounterVec::new(
            Opts::new(
                "registry_config_events_total",
                "Config change notifications received",
            ),
            &["kind", "event"],
        )?;

        let rebuilds_total = Counter::new("registry_rebuilds_total", "Total index rebuilds")?;

        let rebuild_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "registry_rebuild_duration_seconds",
            "Index rebuild latency in seconds",
        ))?;

        let malformed_records_total = CounterVec::new(
            Opts::new(
                "registry_malformed_records_total",
                "Config records skipped because they failed conversion",
            ),
            &["kind"],
        )?;

        let handler_dispatches_total = CounterVec::new(
            Opts::new(
                "registry_handler_dispatches_total",
                "Handler invocations dispatched",
            ),
            &["entity"],
        )?;

        let indexed_instances = IntGauge::new(
            "registry_indexed_instances",
            "Instances in the current index snapshot",
        )?;

        registry.register(Box::new(config_events_total.clone()))?;
        registry.register(Box::new(rebuilds_total.clone()))?;
        registry.register(Box::new(rebuild_duration_seconds.clone()))?;
        registry.register(Box::new(malformed_records_total.clone()))?;
        registry.register(Box::new(handler_dispatches_total.clone()))?;
        registry.register(Box::new(indexed_instances.clone()))?;

        Ok(Self {
            config_events_total,
            rebuilds_total,
            rebuild_duration_seconds,
            malformed_records_total,
            handler_dispatches_total,
            indexed_instances,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| CoreError::Internal(e.to_string()))
    }
}
