//! The connection, session and routing fabric of the filament cluster.
//!
//! A filament process is either a *gateway* (terminates long-lived client
//! connections) or a *logic service* (executes command handlers); both are
//! built from the pieces in this crate:
//!
//! - [`conn`]: the framed transport contract and its TCP ([`tcp`]) and
//!   WebSocket ([`websocket`]) realizations
//! - [`channel`]: the per-connection actor with its async write pipeline
//! - [`server`]: accept → upgrade → authenticate → register → read loop
//! - [`client`]: the outbound peer handle used for inter-service links
//! - [`registry`]: service discovery contract plus an in-process backend
//! - [`storage`]: cluster-visible sessions and the location directory
//!
//! Every long-lived I/O actor is an independent tokio task; coordination
//! is channel-based, with [`Event`] as the fire-once signal.

use std::time::Duration;

pub mod channel;
pub mod channels;
pub mod client;
pub mod conn;
mod error;
mod event;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod storage;
pub mod tcp;
pub mod websocket;

pub use channel::Channel;
pub use channels::{ChannelMap, Channels};
pub use client::{Client, ClientOptions};
pub use conn::{Conn, Dialer, DialerContext, FrameReader, FrameWriter, Upgrader};
pub use error::Error;
pub use event::Event;
pub use listener::{Acceptor, Agent, MessageListener, Meta, StateListener};
pub use registry::{MemoryRegistry, Registry, Service, ServiceRegistration};
pub use server::{Server, ServerOptions};
pub use storage::{MemoryStorage, SessionStorage};

/// Result alias for fabric operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Read deadline applied before every channel read.
pub const DEFAULT_READ_WAIT: Duration = Duration::from_secs(3 * 60);

/// Write deadline refreshed before every write.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// How long an accepted connection may take to authenticate.
pub const DEFAULT_LOGIN_WAIT: Duration = Duration::from_secs(10);

/// Interval between heartbeat pings on outbound clients.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(55);
