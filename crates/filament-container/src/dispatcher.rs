//! Outbound boundary for logic-service handlers.
//!
//! Handlers never touch channels or pools directly; they hand a packet
//! and a channel list to a `Dispatcher`, which labels it with the
//! destination metas and sends it back out the gateway's own link.

use std::sync::Arc;

use async_trait::async_trait;
use filament_proto::{meta_keys, LogicPkt};

use crate::{Container, Result};

/// Pushes a packet to a set of channels on one gateway.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Deliver `packet` to every channel in `channels` on `gateway`.
    async fn push(&self, gateway: &str, channels: &[String], packet: LogicPkt) -> Result<()>;
}

/// Dispatcher backed by the local container: the destination gateway is
/// reachable as an inbound channel on this logic service's server.
pub struct ContainerDispatcher {
    container: Arc<Container>,
}

impl ContainerDispatcher {
    /// A dispatcher through `container`.
    pub fn new(container: Arc<Container>) -> Self {
        Self { container }
    }
}

#[async_trait]
impl Dispatcher for ContainerDispatcher {
    async fn push(&self, gateway: &str, channels: &[String], mut packet: LogicPkt) -> Result<()> {
        packet
            .header
            .add_string_meta(meta_keys::DEST_CHANNELS, channels.join(","));

        self.container.push(gateway, packet).await
    }
}
