//! Fabric error taxonomy.
//!
//! Grouped by what callers must do: transient I/O errors tear the channel
//! or client down, protocol errors drop the packet (inbound) or fail the
//! send (outbound), lifecycle errors return to the public entrypoint with
//! no partial state, and [`Error::SessionNil`] is the distinguished "no
//! session" sentinel handlers treat as *offline*, not as a failure.

use thiserror::Error;

/// Errors produced by the fabric.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying transport failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wire codec failure; fatal for the connection it occurred on.
    #[error(transparent)]
    Protocol(#[from] filament_proto::ProtocolError),

    /// WebSocket transport failure.
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No frame arrived within the read deadline.
    #[error("read deadline exceeded")]
    ReadTimeout,

    /// A write did not complete within the write deadline.
    #[error("write deadline exceeded")]
    WriteTimeout,

    /// The peer sent a Close frame.
    #[error("remote side closed the channel")]
    RemoteClosed,

    /// Push on a channel that has already closed.
    #[error("channel has closed")]
    ChannelClosed,

    /// Push to an id with no registered channel.
    #[error("channel {0} not found")]
    ChannelNotFound(String),

    /// A second `read_loop` call on the same channel.
    #[error("channel read loop is already running")]
    AlreadyReading,

    /// Connect on an already-connected client.
    #[error("client has connected")]
    AlreadyConnected,

    /// Send or read on a client that is not connected.
    #[error("client is not connected")]
    NotConnected,

    /// The dialer produced no usable connection.
    #[error("handshake: {0}")]
    Handshake(String),

    /// Missing or invalid wiring detected at startup.
    #[error("config: {0}")]
    Config(String),

    /// Authentication failed during accept.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Repeat subscription for a service name.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    /// Registry backend failure.
    #[error("registry: {0}")]
    Registry(String),

    /// Session storage backend failure.
    #[error("storage: {0}")]
    Storage(String),

    /// No session for the queried account or channel. Handlers treat this
    /// as "offline", never as a system failure.
    #[error("session not found")]
    SessionNil,
}
