//! The accepting side of the fabric.
//!
//! Lifecycle per connection: accept → upgrade → authenticate (acceptor)
//! → uniqueness check → register channel → read loop → remove → notify
//! state listener → close. The whole sequence runs on one task per
//! connection; only payload dispatch forks further.

use std::{net::SocketAddr, sync::Arc, sync::OnceLock, time::Duration};

use filament_proto::{OpCode, SEQ};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::{
    channels::{ChannelMap, Channels},
    conn::{Conn, Upgrader},
    listener::{Acceptor, Agent, MessageListener, Meta, StateListener},
    metrics, Channel, Error, Event, Result, ServiceRegistration, DEFAULT_LOGIN_WAIT,
    DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT,
};

/// Timeouts applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Budget for the login exchange.
    pub login_wait: Duration,
    /// Read deadline, refreshed before every read.
    pub read_wait: Duration,
    /// Write deadline, refreshed before every write.
    pub write_wait: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            login_wait: DEFAULT_LOGIN_WAIT,
            read_wait: DEFAULT_READ_WAIT,
            write_wait: DEFAULT_WRITE_WAIT,
        }
    }
}

/// A listening endpoint plus the channel registry behind it.
///
/// Wiring (acceptor, listeners, channel map) happens before the server is
/// shared; `start` then runs the accept loop until shutdown.
pub struct Server {
    listen: String,
    service: ServiceRegistration,
    upgrader: Arc<dyn Upgrader>,
    options: ServerOptions,
    channels: Arc<dyn ChannelMap>,
    acceptor: Option<Arc<dyn Acceptor>>,
    message_listener: Option<Arc<dyn MessageListener>>,
    state_listener: Option<Arc<dyn StateListener>>,
    quit: Event,
    bound: Event,
    bound_addr: OnceLock<SocketAddr>,
}

impl Server {
    /// A server for `listen` announcing itself as `service`, speaking the
    /// transport `upgrader` provides.
    pub fn new(
        listen: impl Into<String>,
        service: ServiceRegistration,
        upgrader: Arc<dyn Upgrader>,
    ) -> Self {
        Self {
            listen: listen.into(),
            service,
            upgrader,
            options: ServerOptions::default(),
            channels: Arc::new(Channels::new()),
            acceptor: None,
            message_listener: None,
            state_listener: None,
            quit: Event::new(),
            bound: Event::new(),
            bound_addr: OnceLock::new(),
        }
    }

    /// Replace the default accept-anything acceptor.
    pub fn set_acceptor(&mut self, acceptor: Arc<dyn Acceptor>) {
        self.acceptor = Some(acceptor);
    }

    /// Install the payload handler. Required before [`Server::start`].
    pub fn set_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.message_listener = Some(listener);
    }

    /// Install the disconnect observer. Required before [`Server::start`].
    pub fn set_state_listener(&mut self, listener: Arc<dyn StateListener>) {
        self.state_listener = Some(listener);
    }

    /// Override the read deadline. Zero is ignored.
    pub fn set_read_wait(&mut self, read_wait: Duration) {
        if !read_wait.is_zero() {
            self.options.read_wait = read_wait;
        }
    }

    /// Replace the channel registry.
    pub fn set_channel_map(&mut self, channels: Arc<dyn ChannelMap>) {
        self.channels = channels;
    }

    /// The registration this server announces.
    pub fn service(&self) -> &ServiceRegistration {
        &self.service
    }

    /// The channel registry.
    pub fn channels(&self) -> &Arc<dyn ChannelMap> {
        &self.channels
    }

    /// Address actually bound, once [`Server::start`] has bound it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound_addr.get().copied()
    }

    /// Wait until the listener is bound and return its address.
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        self.bound.done().await;

        self.local_addr()
    }

    /// Listen and accept until shutdown.
    ///
    /// Fails fast when the state or message listener is missing; the
    /// acceptor defaults to accept-anything and the channel map to the
    /// built-in registry.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let state_listener = self
            .state_listener
            .clone()
            .ok_or_else(|| Error::Config("state listener is required".into()))?;
        let message_listener = self
            .message_listener
            .clone()
            .ok_or_else(|| Error::Config("message listener is required".into()))?;
        let acceptor = self
            .acceptor
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultAcceptor) as Arc<dyn Acceptor>);

        let listener = TcpListener::bind(&self.listen).await?;

        if let Ok(addr) = listener.local_addr() {
            let _ = self.bound_addr.set(addr);
        }
        self.bound.fire();

        info!(
            module = self.upgrader.name(),
            listen = %self.listen,
            id = %self.service.id,
            "started"
        );

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = self.quit.done() => return Ok(()),
            };

            match accepted {
                Ok((stream, _)) => {
                    let server = Arc::clone(&self);
                    let acceptor = Arc::clone(&acceptor);
                    let message_listener = Arc::clone(&message_listener);
                    let state_listener = Arc::clone(&state_listener);

                    tokio::spawn(async move {
                        server
                            .handle(stream, acceptor, message_listener, state_listener)
                            .await;
                    });
                },
                Err(e) => {
                    warn!(error = %e, "accept failed");
                },
            }
        }
    }

    async fn handle(
        self: Arc<Self>,
        stream: TcpStream,
        acceptor: Arc<dyn Acceptor>,
        message_listener: Arc<dyn MessageListener>,
        state_listener: Arc<dyn StateListener>,
    ) {
        // The raw connection is owned by the upgrader from here on; every
        // failure path below drops it, which closes it.
        let mut conn = match self.upgrader.upgrade(stream).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "upgrade failed");
                return;
            },
        };

        let (id, meta) = match acceptor.accept(conn.as_mut(), self.options.login_wait).await {
            Ok(accepted) => accepted,
            Err(e) => {
                // Tell the client why before closing.
                Self::refuse(conn, &e.to_string()).await;
                return;
            },
        };

        if self.channels.get(&id).is_some() {
            Self::refuse(conn, "channelId is repeated").await;
            return;
        }

        let channel = Channel::new(
            id.clone(),
            meta,
            conn,
            self.options.read_wait,
            self.options.write_wait,
        );

        self.channels.add(Arc::clone(&channel));

        let gauge = metrics::channel_gauge()
            .with_label_values(&[self.service.id.as_str(), self.service.name.as_str()]);
        gauge.inc();

        info!(id = %channel.id(), "accept user in");

        if let Err(e) = Arc::clone(&channel).read_loop(message_listener).await {
            debug!(id = %channel.id(), error = %e, "read loop stopped");
        }

        self.channels.remove(channel.id());

        let agent: Arc<dyn Agent> = Arc::clone(&channel) as Arc<dyn Agent>;
        let _ = state_listener.disconnect(agent).await;

        channel.close();
        gauge.dec();
    }

    async fn refuse(mut conn: Box<dyn Conn>, reason: &str) {
        let _ = conn.write_frame(OpCode::Close, reason.as_bytes()).await;
        let _ = conn.flush().await;
    }

    /// Push `data` to the channel registered under `id`.
    pub async fn push(&self, id: &str, data: Vec<u8>) -> Result<()> {
        let channel = self
            .channels
            .get(id)
            .ok_or_else(|| Error::ChannelNotFound(id.to_owned()))?;

        channel.push(data).await
    }

    /// Close every live channel and stop the accept loop. Idempotent.
    ///
    /// Yields between channels so a caller racing this against a deadline
    /// (`tokio::time::timeout`) cancels cleanly mid-iteration. Read loops
    /// are not killed; they observe the channel close and exit.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.quit.fire() {
            return Ok(());
        }

        for channel in self.channels.all() {
            channel.close();
            tokio::task::yield_now().await;
        }

        info!(id = %self.service.id, "shutdown");

        Ok(())
    }
}

/// Accepts every connection and assigns a generated channel id. Stands in
/// until the edge service installs its authenticating acceptor.
struct DefaultAcceptor;

#[async_trait::async_trait]
impl Acceptor for DefaultAcceptor {
    async fn accept(&self, _conn: &mut dyn Conn, _timeout: Duration) -> Result<(String, Meta)> {
        Ok((format!("chan_{}", SEQ.next()), Meta::new()))
    }
}
