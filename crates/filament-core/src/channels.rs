//! Concurrent id → channel registry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::error;

use crate::Channel;

/// The channel registry contract. The server enforces id uniqueness
/// *before* adding; a late duplicate add overwrites.
pub trait ChannelMap: Send + Sync {
    /// Register a channel under its id.
    fn add(&self, channel: Arc<Channel>);

    /// Remove by id, returning the channel if it was present.
    fn remove(&self, id: &str) -> Option<Arc<Channel>>;

    /// Look up by id.
    fn get(&self, id: &str) -> Option<Arc<Channel>>;

    /// Snapshot of all live channels.
    fn all(&self) -> Vec<Arc<Channel>>;
}

/// Sharded-lock implementation backed by `DashMap`.
#[derive(Default)]
pub struct Channels {
    channels: DashMap<String, Arc<Channel>>,
}

impl Channels {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelMap for Channels {
    fn add(&self, channel: Arc<Channel>) {
        if channel.id().is_empty() {
            // Programming error on the caller's side; the entry would be
            // unreachable via get().
            error!("channel id is required");
        }

        self.channels.insert(channel.id().to_owned(), channel);
    }

    fn remove(&self, id: &str) -> Option<Arc<Channel>> {
        self.channels.remove(id).map(|(_, channel)| channel)
    }

    fn get(&self, id: &str) -> Option<Arc<Channel>> {
        if id.is_empty() {
            error!("channel id is required");
        }

        self.channels.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
