//! Concurrent id → outbound client pool, one per dependent service.

use std::sync::Arc;

use dashmap::DashMap;
use filament_core::{Client, Service};
use tracing::error;

/// The client pool contract.
pub trait ClientMap: Send + Sync {
    /// Register a client under its service id.
    fn add(&self, client: Arc<Client>);

    /// Remove by service id.
    fn remove(&self, id: &str);

    /// Look up by service id.
    fn get(&self, id: &str) -> Option<Arc<Client>>;

    /// All clients, as selectable services.
    fn services(&self) -> Vec<Arc<dyn Service>>;

    /// Clients whose meta carries `key == value`, as selectable services.
    fn services_with_meta(&self, key: &str, value: &str) -> Vec<Arc<dyn Service>>;
}

/// Sharded-lock pool backed by `DashMap`.
///
/// [`Client`] implements [`Service`], so handing pool entries to a
/// selector is a coercion, not a cast.
#[derive(Default)]
pub struct Clients {
    clients: DashMap<String, Arc<Client>>,
}

impl Clients {
    /// An empty pool.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClientMap for Clients {
    fn add(&self, client: Arc<Client>) {
        if client.id().is_empty() {
            error!("client id is required");
        }

        self.clients.insert(client.id().to_owned(), client);
    }

    fn remove(&self, id: &str) {
        self.clients.remove(id);
    }

    fn get(&self, id: &str) -> Option<Arc<Client>> {
        if id.is_empty() {
            error!("client id is required");
        }

        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn services(&self) -> Vec<Arc<dyn Service>> {
        self.clients
            .iter()
            .map(|entry| Arc::clone(entry.value()) as Arc<dyn Service>)
            .collect()
    }

    fn services_with_meta(&self, key: &str, value: &str) -> Vec<Arc<dyn Service>> {
        self.clients
            .iter()
            .filter(|entry| entry.value().meta().get(key).map(String::as_str) == Some(value))
            .map(|entry| Arc::clone(entry.value()) as Arc<dyn Service>)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use filament_core::ClientOptions;

    use super::*;

    #[test]
    fn filter_by_meta() {
        let pool = Clients::new();

        let young = Client::new("s1", "chat", ClientOptions::default());
        young.set_meta("service_state", "young");
        pool.add(young);

        let adult = Client::new("s2", "chat", ClientOptions::default());
        adult.set_meta("service_state", "adult");
        pool.add(adult);

        assert_eq!(pool.services().len(), 2);

        let adults = pool.services_with_meta("service_state", "adult");
        assert_eq!(adults.len(), 1);
        assert_eq!(adults[0].service_id(), "s2");
    }
}
