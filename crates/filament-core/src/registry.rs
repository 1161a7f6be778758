//! Service discovery contract and an in-process backend.
//!
//! The production backend (consul-style catalog with health checks and
//! long-poll watches) plugs in behind [`Registry`]; the fabric only ever
//! talks to the trait. [`MemoryRegistry`] is the in-process realization
//! used by tests and single-node deployments.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::{listener::Meta, Error, Result};

/// A service instance as announced to the registry.
///
/// `meta` always carries `protocol` and may carry `health_url`, `zone`
/// and `domain` (see [`filament_proto::meta_keys`]).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceRegistration {
    /// Unique instance id, e.g. `wgateway-01`.
    pub id: String,
    /// Service name shared by interchangeable instances.
    pub name: String,
    /// Public address peers dial.
    pub address: String,
    /// Public port peers dial.
    pub port: u16,
    /// Transport protocol, `tcp` or `websocket`.
    pub protocol: String,
    /// Registry namespace; empty for the default.
    pub namespace: String,
    /// Free-form labels used by [`Registry::find`] filtering.
    pub tags: Vec<String>,
    /// String key/value metadata.
    pub meta: Meta,
}

impl ServiceRegistration {
    /// The address an outbound client dials, protocol-qualified for
    /// transports that need a URL.
    pub fn dial_url(&self) -> String {
        if self.protocol == filament_proto::protocols::WEBSOCKET {
            return format!("ws://{}:{}", self.address, self.port);
        }

        format!("{}:{}", self.address, self.port)
    }

    /// Whether this instance has a dialable public endpoint.
    pub fn has_public_endpoint(&self) -> bool {
        !self.address.is_empty() && self.port != 0
    }
}

/// Read-only view of a service instance, implemented both by
/// [`ServiceRegistration`] and by live outbound clients, so selectors can
/// score either.
pub trait Service: Send + Sync {
    /// Unique instance id.
    fn service_id(&self) -> &str;

    /// Service name.
    fn service_name(&self) -> &str;

    /// Snapshot of the instance metadata.
    fn meta(&self) -> Meta;
}

impl Service for ServiceRegistration {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> Meta {
        self.meta.clone()
    }
}

/// Callback invoked with the full current listing whenever a watched
/// service changes. Runs on the registry's watcher task; it must not
/// block indefinitely.
pub type WatchCallback = Arc<dyn Fn(Vec<ServiceRegistration>) + Send + Sync>;

/// The service registry contract consumed by the container.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Announce a service. Backends with health checking poll the
    /// `health_url` meta endpoint and auto-deregister after a threshold
    /// of consecutive failures.
    async fn register(&self, service: ServiceRegistration) -> Result<()>;

    /// Withdraw an instance by id.
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// One-shot listing of currently healthy instances matching all tags.
    async fn find(&self, name: &str, tags: &[String]) -> Result<Vec<ServiceRegistration>>;

    /// Install a watcher for `name`. Repeat subscription is an error.
    async fn subscribe(&self, name: &str, callback: WatchCallback) -> Result<()>;

    /// Stop the watcher for `name` at its next callback boundary.
    async fn unsubscribe(&self, name: &str) -> Result<()>;
}

/// In-process registry backend.
///
/// Register/deregister notify watchers synchronously with the full new
/// listing, which is exactly the long-poll contract collapsed to zero
/// latency. No health polling: an in-process instance is healthy until
/// deregistered.
#[derive(Default)]
pub struct MemoryRegistry {
    // name → current instance listing
    services: DashMap<String, Vec<ServiceRegistration>>,
    watches: DashMap<String, WatchCallback>,
}

impl MemoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, name: &str) {
        let listing = self
            .services
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        if let Some(watch) = self.watches.get(name) {
            (watch.value())(listing);
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, service: ServiceRegistration) -> Result<()> {
        if service.id.is_empty() || service.name.is_empty() {
            return Err(Error::Registry("service id and name are required".into()));
        }

        debug!(id = %service.id, name = %service.name, "register");

        let name = service.name.clone();
        {
            let mut listing = self.services.entry(name.clone()).or_default();
            listing.retain(|s| s.id != service.id);
            listing.push(service);
        }

        self.notify(&name);

        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let mut touched = None;

        for mut entry in self.services.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|s| s.id != service_id);

            if entry.value().len() != before {
                touched = Some(entry.key().clone());
                break;
            }
        }

        if let Some(name) = touched {
            debug!(id = %service_id, name = %name, "deregister");
            self.notify(&name);
        }

        Ok(())
    }

    async fn find(&self, name: &str, tags: &[String]) -> Result<Vec<ServiceRegistration>> {
        let listing = self
            .services
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        Ok(listing
            .into_iter()
            .filter(|s| tags.iter().all(|tag| s.tags.contains(tag)))
            .collect())
    }

    async fn subscribe(&self, name: &str, callback: WatchCallback) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.watches.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(Error::AlreadySubscribed(name.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(callback);
                Ok(())
            },
        }
    }

    async fn unsubscribe(&self, name: &str) -> Result<()> {
        self.watches.remove(name);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn registration(id: &str, name: &str) -> ServiceRegistration {
        ServiceRegistration {
            id: id.into(),
            name: name.into(),
            address: "127.0.0.1".into(),
            port: 9000,
            protocol: "tcp".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn find_after_register() {
        let registry = MemoryRegistry::new();
        registry.register(registration("c1", "chat")).await.unwrap();
        registry.register(registration("c2", "chat")).await.unwrap();

        let found = registry.find("chat", &[]).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn find_filters_by_tags() {
        let registry = MemoryRegistry::new();

        let mut tagged = registration("c1", "chat");
        tagged.tags = vec!["v2".into()];
        registry.register(tagged).await.unwrap();
        registry.register(registration("c2", "chat")).await.unwrap();

        let found = registry.find("chat", &["v2".into()]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "c1");
    }

    #[tokio::test]
    async fn subscribe_sees_changes_and_repeat_is_an_error() {
        let registry = MemoryRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        registry
            .subscribe(
                "chat",
                Arc::new(move |listing| {
                    counter.store(listing.len(), Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        let repeat = registry.subscribe("chat", Arc::new(|_| {})).await;
        assert!(matches!(repeat, Err(Error::AlreadySubscribed(_))));

        registry.register(registration("c1", "chat")).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        registry.deregister("c1").await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_stops_notifications() {
        let registry = MemoryRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        registry
            .subscribe(
                "chat",
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        registry.unsubscribe("chat").await.unwrap();
        registry.register(registration("c1", "chat")).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }
}
