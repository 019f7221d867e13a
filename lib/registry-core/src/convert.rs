//! Conversion of raw config records into services and instances

use crate::model::{Endpoint, Instance, Labels, Port, Service, ServiceAttributes};
use crate::{CoreError, Result};
use registry_api::{ConfigRecord, ConfigSpec, Location, Resolution, ServiceEntrySpec};
use std::sync::Arc;

/// Pure mapping from one raw record to the entities it declares.
///
/// Implementations must be deterministic and free of side effects; they are
/// called from the rebuild path, from event dispatch and from the query
/// surface, possibly concurrently.
pub trait Converter: Send + Sync {
    fn to_services(&self, record: &ConfigRecord) -> Result<Vec<Service>>;

    fn to_instances(&self, record: &ConfigRecord) -> Result<Vec<Instance>>;
}

/// Converter for ServiceEntry records
#[derive(Clone, Copy, Debug, Default)]
pub struct ServiceEntryConverter;

impl Converter for ServiceEntryConverter {
    fn to_services(&self, record: &ConfigRecord) -> Result<Vec<Service>> {
        match &record.spec {
            ConfigSpec::ServiceEntry(spec) => convert_services(record, spec),
        }
    }

    fn to_instances(&self, record: &ConfigRecord) -> Result<Vec<Instance>> {
        match &record.spec {
            ConfigSpec::ServiceEntry(spec) => convert_instances(record, spec),
        }
    }
}

fn invalid(record: &ConfigRecord, reason: String) -> CoreError {
    CoreError::InvalidConfiguration(format!("{}: {}", record.key(), reason))
}

fn port_number(record: &ConfigRecord, number: u32) -> Result<u16> {
    match u16::try_from(number) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(invalid(record, format!("port {} out of range", number))),
    }
}

fn convert_ports(record: &ConfigRecord, spec: &ServiceEntrySpec) -> Result<Vec<Port>> {
    spec.ports
        .iter()
        .map(|p| {
            if p.name.is_empty() {
                return Err(invalid(record, format!("port {} has no name", p.number)));
            }
            Ok(Port {
                name: p.name.clone(),
                port: port_number(record, p.number)?,
                protocol: p.protocol.clone(),
            })
        })
        .collect()
}

fn convert_services(record: &ConfigRecord, spec: &ServiceEntrySpec) -> Result<Vec<Service>> {
    if spec.hosts.is_empty() {
        return Err(invalid(record, "no hosts".to_string()));
    }
    let ports = convert_ports(record, spec)?;

    spec.hosts
        .iter()
        .map(|host| {
            if host.is_empty() {
                return Err(invalid(record, "empty host".to_string()));
            }
            Ok(Service {
                hostname: host.clone(),
                addresses: spec.addresses.clone(),
                ports: ports.clone(),
                resolution: spec.resolution,
                mesh_external: spec.location == Location::MeshExternal,
                attributes: ServiceAttributes {
                    name: host.clone(),
                    namespace: record.namespace.clone(),
                },
            })
        })
        .collect()
}

fn convert_instances(record: &ConfigRecord, spec: &ServiceEntrySpec) -> Result<Vec<Instance>> {
    let services = convert_services(record, spec)?;
    let mut out = Vec::new();

    for service in services {
        let service = Arc::new(service);

        // DNS entries without endpoints resolve the host itself
        if spec.endpoints.is_empty() {
            if spec.resolution == Resolution::Dns {
                for port in &service.ports {
                    out.push(Instance {
                        service: service.clone(),
                        endpoint: Endpoint {
                            address: service.hostname.clone(),
                            port: port.port,
                            service_port: port.clone(),
                        },
                        labels: Labels::new(),
                    });
                }
            }
            continue;
        }

        for endpoint in &spec.endpoints {
            if endpoint.address.is_empty() {
                return Err(invalid(record, "endpoint without address".to_string()));
            }
            let labels = Labels::from(endpoint.labels.clone());
            for port in &service.ports {
                let target = match endpoint.ports.get(&port.name) {
                    Some(number) => port_number(record, *number)?,
                    None => port.port,
                };
                out.push(Instance {
                    service: service.clone(),
                    endpoint: Endpoint {
                        address: endpoint.address.clone(),
                        port: target,
                        service_port: port.clone(),
                    },
                    labels: labels.clone(),
                });
            }
        }
    }

    Ok(out)
}
