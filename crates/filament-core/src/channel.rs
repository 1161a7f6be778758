//! The per-connection actor on the server side.
//!
//! A `Channel` owns one accepted connection: the write half feeds a
//! dedicated writer task through a small bounded queue, the read half is
//! consumed exactly once by [`Channel::read_loop`]. Producers therefore
//! never touch the transport; they enqueue and the writer coalesces.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use filament_proto::{Frame, OpCode};
use tokio::{
    sync::{mpsc, Mutex},
    time::timeout,
};
use tracing::{debug, trace, warn};

use crate::{
    conn::{Conn, FrameReader, FrameWriter},
    listener::{Agent, MessageListener, Meta},
    Error, Event, Result,
};

/// Capacity of the pending-write queue. Deliberately small: a slow
/// consumer backpressures its producers instead of buffering unbounded.
pub const WRITE_QUEUE_CAPACITY: usize = 5;

/// A long-lived server-side representation of one client connection.
pub struct Channel {
    id: String,
    meta: Meta,
    remote_addr: Option<SocketAddr>,
    outbound: mpsc::Sender<(OpCode, Vec<u8>)>,
    reader: Mutex<Option<Box<dyn FrameReader>>>,
    closed: Event,
    read_wait: Duration,
}

impl Channel {
    /// Wrap a connection. Splits it and spawns the writer task; the
    /// channel is live until [`Channel::close`] or a transport failure.
    pub fn new(
        id: impl Into<String>,
        meta: Meta,
        conn: Box<dyn Conn>,
        read_wait: Duration,
        write_wait: Duration,
    ) -> Arc<Self> {
        let remote_addr = conn.remote_addr();
        let (reader, writer) = conn.split();
        let (outbound, pending) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        let channel = Arc::new(Self {
            id: id.into(),
            meta,
            remote_addr,
            outbound,
            reader: Mutex::new(Some(reader)),
            closed: Event::new(),
            read_wait,
        });

        let writer_channel = Arc::clone(&channel);
        tokio::spawn(async move {
            if let Err(e) = writer_channel.write_loop(writer, pending, write_wait).await {
                debug!(id = %writer_channel.id, error = %e, "write loop stopped");
            }
        });

        channel
    }

    /// Channel id, unique within this gateway process.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Labels attached at accept time.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Peer address, when the transport knows it.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Enqueue a payload for delivery as a Binary frame.
    ///
    /// Suspends while the queue is full (local backpressure). Fails once
    /// the channel has closed.
    pub async fn push(&self, payload: Vec<u8>) -> Result<()> {
        if self.closed.has_fired() {
            return Err(Error::ChannelClosed);
        }

        self.outbound
            .send((OpCode::Binary, payload))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Close the channel. Idempotent; the writer task sees the event and
    /// exits. The underlying connection is dropped when the read loop
    /// returns and the server discards the channel.
    pub fn close(&self) {
        if self.closed.fire() {
            debug!(id = %self.id, "channel closed");
        }
    }

    /// Whether the channel has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.has_fired()
    }

    /// Drive the read side until the connection dies, the peer closes, or
    /// the channel is closed locally.
    ///
    /// The reader half is taken on entry: there is exactly one read loop
    /// per channel and a second call returns [`Error::AlreadyReading`].
    ///
    /// Ping frames are answered through the write queue; Binary frames
    /// are dispatched to `listener` each in its own task, so one slow
    /// handler never stalls the connection.
    pub async fn read_loop(
        self: Arc<Self>,
        listener: Arc<dyn MessageListener>,
    ) -> Result<()> {
        let mut reader = self.reader.lock().await.take().ok_or(Error::AlreadyReading)?;

        loop {
            let frame = tokio::select! {
                read = timeout(self.read_wait, reader.read_frame()) => match read {
                    Ok(result) => result?,
                    Err(_) => return Err(Error::ReadTimeout),
                },
                () = self.closed.done() => return Ok(()),
            };

            let Frame { opcode, payload } = frame;

            match opcode {
                OpCode::Close => return Err(Error::RemoteClosed),
                OpCode::Ping => {
                    trace!(id = %self.id, "recv a ping; resp with a pong");
                    let _ = self.outbound.send((OpCode::Pong, Vec::new())).await;
                },
                OpCode::Binary if !payload.is_empty() => {
                    Self::dispatch(&self, &listener, payload);
                },
                _ => {},
            }
        }
    }

    fn dispatch(channel: &Arc<Self>, listener: &Arc<dyn MessageListener>, payload: Bytes) {
        let agent: Arc<dyn Agent> = Arc::clone(channel) as Arc<dyn Agent>;
        let listener = Arc::clone(listener);

        tokio::spawn(async move {
            listener.receive(agent, payload).await;
        });
    }

    /// The writer task: dequeue one payload, write it, then drain whatever
    /// is already queued before flushing once. Bursts coalesce into a
    /// single flush without any timer.
    async fn write_loop(
        &self,
        mut writer: Box<dyn FrameWriter>,
        mut pending: mpsc::Receiver<(OpCode, Vec<u8>)>,
        write_wait: Duration,
    ) -> Result<()> {
        loop {
            tokio::select! {
                next = pending.recv() => {
                    let Some((opcode, payload)) = next else { return Ok(()) };

                    let result: Result<()> = async {
                        Self::write_with_deadline(&mut *writer, opcode, &payload, write_wait).await?;

                        while let Ok((opcode, payload)) = pending.try_recv() {
                            Self::write_with_deadline(&mut *writer, opcode, &payload, write_wait).await?;
                        }

                        match timeout(write_wait, writer.flush()).await {
                            Ok(flushed) => flushed,
                            Err(_) => Err(Error::WriteTimeout),
                        }
                    }
                    .await;

                    if let Err(e) = result {
                        // The transport is gone; reject further pushes now
                        // rather than letting producers fill a dead queue.
                        self.close();
                        return Err(e);
                    }
                },
                () = self.closed.done() => return Ok(()),
            }
        }
    }

    async fn write_with_deadline(
        writer: &mut dyn FrameWriter,
        opcode: OpCode,
        payload: &[u8],
        write_wait: Duration,
    ) -> Result<()> {
        match timeout(write_wait, writer.write_frame(opcode, payload)).await {
            Ok(written) => written,
            Err(_) => {
                warn!("write frame deadline exceeded");
                Err(Error::WriteTimeout)
            },
        }
    }
}

#[async_trait::async_trait]
impl Agent for Channel {
    fn id(&self) -> &str {
        &self.id
    }

    fn meta(&self) -> &Meta {
        &self.meta
    }

    async fn push(&self, payload: Vec<u8>) -> Result<()> {
        Self::push(self, payload).await
    }
}
