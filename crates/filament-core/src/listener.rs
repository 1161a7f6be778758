//! Seams between the fabric and the edge services.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{conn::Conn, Result};

/// String key/value labels attached to a channel at accept time.
pub type Meta = HashMap<String, String>;

/// The sender side of a connection as handlers see it: enough to identify
/// the channel and push bytes back, nothing more.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Channel id.
    fn id(&self) -> &str;

    /// Labels attached at accept time.
    fn meta(&self) -> &Meta;

    /// Enqueue a payload for asynchronous delivery.
    async fn push(&self, payload: Vec<u8>) -> Result<()>;
}

/// Authenticates a fresh connection within the login deadline and names
/// its channel.
#[async_trait]
pub trait Acceptor: Send + Sync {
    /// Drive the login exchange on `conn`. Returns the channel id and the
    /// labels to attach; an error closes the connection with the error
    /// text as the Close reason.
    async fn accept(&self, conn: &mut dyn Conn, timeout: Duration) -> Result<(String, Meta)>;
}

/// Receives every non-empty Binary payload read from a channel.
///
/// Each call runs in its own task: handlers must not assume serialization
/// with sibling messages from the same channel.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Handle one inbound payload.
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes);
}

/// Observes channel teardown, exactly once per channel.
#[async_trait]
pub trait StateListener: Send + Sync {
    /// The channel's read loop has exited and it left the channel map.
    async fn disconnect(&self, agent: Arc<dyn Agent>) -> Result<()>;
}
