//! Outbound peer handle for inter-service links.
//!
//! One `Client` per peer service instance, owned by the container's pool.
//! Reconnection is event-driven: when the read loop fails the container
//! removes the client, and the next registry notification rebuilds it.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, RwLock, Weak,
    },
    time::Duration,
};

use filament_proto::{Frame, OpCode};
use tokio::{
    sync::Mutex,
    time::{interval, timeout, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

use crate::{
    conn::{Dialer, DialerContext, FrameReader, FrameWriter},
    listener::Meta,
    registry::Service,
    Error, Event, Result, DEFAULT_LOGIN_WAIT, DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT,
};

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTED: u8 = 1;

/// Client tuning.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Ping interval; `None` disables the heartbeat task.
    pub heartbeat: Option<Duration>,
    /// Read deadline, applied only when the heartbeat is enabled.
    pub read_wait: Duration,
    /// Write deadline, refreshed before every write.
    pub write_wait: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { heartbeat: None, read_wait: DEFAULT_READ_WAIT, write_wait: DEFAULT_WRITE_WAIT }
    }
}

/// A connected peer handle with the framed-transport contract plus an
/// optional heartbeat task.
pub struct Client {
    // Self-handle for the heartbeat task; always upgradable while a
    // caller holds the client.
    me: Weak<Self>,
    id: String,
    name: String,
    meta: RwLock<Meta>,
    state: AtomicU8,
    options: ClientOptions,
    dialer: RwLock<Option<Arc<dyn Dialer>>>,
    reader: Mutex<Option<Box<dyn FrameReader>>>,
    writer: Mutex<Option<Box<dyn FrameWriter>>>,
    closed: Event,
}

impl Client {
    /// A disconnected client identified as `(id, name)` with `meta`
    /// copied from the service registration.
    pub fn with_meta(
        id: impl Into<String>,
        name: impl Into<String>,
        meta: Meta,
        options: ClientOptions,
    ) -> Arc<Self> {
        let id = id.into();
        let name = name.into();

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            id,
            name,
            meta: RwLock::new(meta),
            state: AtomicU8::new(STATE_DISCONNECTED),
            options,
            dialer: RwLock::new(None),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            closed: Event::new(),
        })
    }

    /// A disconnected client without metadata.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        options: ClientOptions,
    ) -> Arc<Self> {
        Self::with_meta(id, name, Meta::new(), options)
    }

    /// Peer service id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Peer service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set one metadata entry.
    pub fn set_meta(&self, key: impl Into<String>, value: impl Into<String>) {
        self.meta
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    /// Install the dialer. Must happen before [`Client::connect`].
    pub fn set_dialer(&self, dialer: Arc<dyn Dialer>) {
        *self
            .dialer
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(dialer);
    }

    /// Dial the peer and perform the application handshake.
    ///
    /// The 0→1 state transition is claimed up front so concurrent calls
    /// fail with [`Error::AlreadyConnected`]; a dial failure reverts it.
    pub async fn connect(&self, addr: &str) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_DISCONNECTED,
                STATE_CONNECTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(Error::AlreadyConnected);
        }

        let dialer = self
            .dialer
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();

        let result = match dialer {
            Some(dialer) => {
                dialer
                    .dial_and_handshake(DialerContext {
                        id: self.id.clone(),
                        name: self.name.clone(),
                        address: addr.to_owned(),
                        timeout: DEFAULT_LOGIN_WAIT,
                    })
                    .await
            },
            None => Err(Error::Config("dialer is required".into())),
        };

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);
                return Err(e);
            },
        };

        let (reader, writer) = conn.split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);

        if let Some(heartbeat) = self.options.heartbeat {
            if let Some(client) = self.me.upgrade() {
                tokio::spawn(async move {
                    client.heartbeat_loop(heartbeat).await;
                });
            }
        }

        Ok(())
    }

    /// Send a payload as one Binary frame. Concurrent senders serialize
    /// on the writer; the write deadline is refreshed per call.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.state.load(Ordering::SeqCst) != STATE_CONNECTED {
            return Err(Error::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;

        Self::write_with_deadline(&mut **writer, OpCode::Binary, payload, self.options.write_wait)
            .await
    }

    /// Read one frame. A received Close frame is surfaced as
    /// [`Error::RemoteClosed`]. The read deadline applies only when the
    /// heartbeat is enabled: with pings flowing, silence means a dead peer.
    pub async fn read(&self) -> Result<Frame> {
        if self.state.load(Ordering::SeqCst) != STATE_CONNECTED {
            return Err(Error::NotConnected);
        }

        let mut reader = self.reader.lock().await;
        let reader = reader.as_mut().ok_or(Error::NotConnected)?;

        let frame = if self.options.heartbeat.is_some() {
            match timeout(self.options.read_wait, reader.read_frame()).await {
                Ok(read) => read?,
                Err(_) => return Err(Error::ReadTimeout),
            }
        } else {
            reader.read_frame().await?
        };

        if frame.opcode == OpCode::Close {
            return Err(Error::RemoteClosed);
        }

        Ok(frame)
    }

    /// Close the connection. Idempotent. Sends a best-effort Close frame,
    /// then drops both halves, which closes the transport.
    pub async fn close(&self) {
        if !self.closed.fire() {
            return;
        }

        if let Some(writer) = self.writer.lock().await.as_mut() {
            let _ = Self::write_with_deadline(
                &mut **writer,
                OpCode::Close,
                &[],
                self.options.write_wait,
            )
            .await;
            let _ = writer.flush().await;
        }

        *self.writer.lock().await = None;
        *self.reader.lock().await = None;

        self.state.store(STATE_DISCONNECTED, Ordering::SeqCst);

        debug!(id = %self.id, "client closed");
    }

    async fn heartbeat_loop(self: Arc<Self>, heartbeat: Duration) {
        let mut ticker = interval(heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the cadence starts
        // one interval after connect.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.ping().await {
                        warn!(id = %self.id, error = %e, "heartbeat stopped");
                        self.close().await;
                        return;
                    }
                },
                () = self.closed.done() => return,
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        trace!(id = %self.id, "send ping to server");

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::NotConnected)?;

        Self::write_with_deadline(&mut **writer, OpCode::Ping, &[], self.options.write_wait).await
    }

    async fn write_with_deadline(
        writer: &mut dyn FrameWriter,
        opcode: OpCode,
        payload: &[u8],
        write_wait: Duration,
    ) -> Result<()> {
        let write = async {
            writer.write_frame(opcode, payload).await?;
            writer.flush().await
        };

        match timeout(write_wait, write).await {
            Ok(written) => written,
            Err(_) => Err(Error::WriteTimeout),
        }
    }
}

impl Service for Client {
    fn service_id(&self) -> &str {
        &self.id
    }

    fn service_name(&self) -> &str {
        &self.name
    }

    fn meta(&self) -> Meta {
        self.meta
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
