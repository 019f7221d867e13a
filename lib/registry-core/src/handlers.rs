//! Subscriber lists and fire-and-forget event dispatch

use crate::model::{Instance, Service};
use registry_api::Event;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Callback for service-level change events
pub type ServiceHandler = Arc<dyn Fn(Arc<Service>, Event) + Send + Sync>;

/// Callback for instance-level change events
pub type InstanceHandler = Arc<dyn Fn(Arc<Instance>, Event) + Send + Sync>;

/// HandlerRegistry keeps the service and instance subscribers in
/// registration order. Registering the same handler twice yields two
/// invocations per event.
#[derive(Default)]
pub struct HandlerRegistry {
    service_handlers: RwLock<Vec<ServiceHandler>>,
    instance_handlers: RwLock<Vec<InstanceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append_service_handler(&self, handler: ServiceHandler) {
        self.service_handlers.write().await.push(handler);
    }

    pub async fn append_instance_handler(&self, handler: InstanceHandler) {
        self.instance_handlers.write().await.push(handler);
    }

    pub async fn service_handler_count(&self) -> usize {
        self.service_handlers.read().await.len()
    }

    pub async fn instance_handler_count(&self) -> usize {
        self.instance_handlers.read().await.len()
    }

    /// Spawn one task per (handler, service). Returns the number of tasks.
    pub async fn dispatch_services(&self, services: &[Arc<Service>], event: Event) -> usize {
        let handlers = self.service_handlers.read().await.clone();
        spawn_all(handlers.as_slice(), services, event)
    }

    /// Spawn one task per (handler, instance). Returns the number of tasks.
    pub async fn dispatch_instances(&self, instances: &[Arc<Instance>], event: Event) -> usize {
        let handlers = self.instance_handlers.read().await.clone();
        spawn_all(handlers.as_slice(), instances, event)
    }
}

// Tasks are detached: a slow or panicking handler never reaches the caller.
fn spawn_all<T>(
    handlers: &[Arc<dyn Fn(Arc<T>, Event) + Send + Sync>],
    entities: &[Arc<T>],
    event: Event,
) -> usize
where
    T: Send + Sync + 'static,
{
    let mut spawned = 0;
    for handler in handlers {
        for entity in entities {
            let handler = handler.clone();
            let entity = entity.clone();
            tokio::spawn(async move { handler(entity, event) });
            spawned += 1;
        }
    }
    spawned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceAttributes;
    use registry_api::Resolution;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn service(hostname: &str) -> Arc<Service> {
        Arc::new(Service {
            hostname: hostname.to_string(),
            addresses: vec![],
            ports: vec![],
            resolution: Resolution::None,
            mesh_external: true,
            attributes: ServiceAttributes {
                name: hostname.to_string(),
                namespace: "default".to_string(),
            },
        })
    }

    fn channel_handler(tx: mpsc::UnboundedSender<(String, Event)>) -> ServiceHandler {
        Arc::new(move |service: Arc<Service>, event: Event| {
            let _ = tx.send((service.hostname.clone(), event));
        })
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<(String, Event)>, n: usize) -> Vec<(String, Event)> {
        let mut out = Vec::new();
        for _ in 0..n {
            let item = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("handler was not invoked")
                .expect("channel closed");
            out.push(item);
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    #[tokio::test]
    async fn test_dispatch_every_handler_entity_pair() {
        let registry = HandlerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.append_service_handler(channel_handler(tx.clone())).await;
        registry.append_service_handler(channel_handler(tx)).await;
        assert_eq!(registry.service_handler_count().await, 2);

        let spawned = registry
            .dispatch_services(&[service("a.example"), service("b.example")], Event::Updated)
            .await;
        assert_eq!(spawned, 4);

        let seen = drain(&mut rx, 4).await;
        assert_eq!(
            seen,
            vec![
                ("a.example".to_string(), Event::Updated),
                ("a.example".to_string(), Event::Updated),
                ("b.example".to_string(), Event::Updated),
                ("b.example".to_string(), Event::Updated),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_handlers_dispatches_nothing() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.instance_handler_count().await, 0);
        assert_eq!(registry.dispatch_services(&[service("a.example")], Event::Added).await, 0);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let registry = HandlerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .append_service_handler(Arc::new(|_: Arc<Service>, _: Event| panic!("handler failure")))
            .await;
        registry.append_service_handler(channel_handler(tx)).await;

        let spawned = registry.dispatch_services(&[service("a.example")], Event::Deleted).await;
        assert_eq!(spawned, 2);
        assert_eq!(
            drain(&mut rx, 1).await,
            vec![("a.example".to_string(), Event::Deleted)]
        );
    }
}
