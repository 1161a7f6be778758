//! The framed transport contract.
//!
//! A [`Conn`] is a full-duplex framed connection. Acceptors use it whole
//! during the login exchange; afterwards the [`Channel`](crate::Channel)
//! splits it so the read loop and the writer task can run concurrently
//! without sharing a lock.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use filament_proto::{Frame, OpCode};

use crate::Result;

/// The receiving half of a split connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Read one frame, suspending until data, error or close.
    async fn read_frame(&mut self) -> Result<Frame>;
}

/// The sending half of a split connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one frame. May buffer; [`FrameWriter::flush`] drains.
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()>;

    /// Drain buffered writes to the transport.
    async fn flush(&mut self) -> Result<()>;
}

/// A full-duplex framed connection.
#[async_trait]
pub trait Conn: Send {
    /// Peer address, when the transport knows it.
    fn remote_addr(&self) -> Option<SocketAddr>;

    /// Read one frame.
    async fn read_frame(&mut self) -> Result<Frame>;

    /// Write one frame.
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()>;

    /// Drain buffered writes.
    async fn flush(&mut self) -> Result<()>;

    /// Split into independently-owned halves. Dropping both halves closes
    /// the underlying transport.
    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>);
}

/// Per-transport handshake producing a [`Conn`] from an accepted stream.
#[async_trait]
pub trait Upgrader: Send + Sync {
    /// Transport name, for logs.
    fn name(&self) -> &'static str;

    /// Perform the handshake. A failure closes the raw connection (it is
    /// consumed either way).
    async fn upgrade(&self, stream: tokio::net::TcpStream) -> Result<Box<dyn Conn>>;
}

/// Everything a [`Dialer`] needs to reach a peer.
#[derive(Debug, Clone)]
pub struct DialerContext {
    /// This process's service id.
    pub id: String,
    /// This process's service name.
    pub name: String,
    /// Peer address to dial.
    pub address: String,
    /// Budget for dial plus handshake.
    pub timeout: Duration,
}

/// Transport dial plus the application-layer hello, injected into
/// [`Client`](crate::Client) so edge services choose how links announce
/// themselves.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dial `ctx.address` and perform the application handshake, returning
    /// a connection ready for framed traffic.
    async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<Box<dyn Conn>>;
}
