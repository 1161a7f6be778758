//! Logic-service edge handler.
//!
//! The acceptor reads the peer's [`InnerHandshake`] and names the channel
//! after the dialing service, so a gateway's link is addressable by its
//! service id. The message listener resolves the caller's session and
//! hands the packet to the router.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use filament_container::{Context, Dispatcher, Router};
use filament_core::{
    Acceptor, Agent, Conn, Error, MessageListener, Meta, SessionStorage, StateListener,
};
use filament_proto::{commands, payloads, payloads::InnerHandshake, Packet, Session, Status};
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Acceptor, message listener and state listener of a logic service.
pub struct ServHandler {
    router: Arc<Router>,
    storage: Arc<dyn SessionStorage>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ServHandler {
    /// A handler routing through `router`, reading sessions from
    /// `storage` and responding through `dispatcher`.
    pub fn new(
        router: Arc<Router>,
        storage: Arc<dyn SessionStorage>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self { router, storage, dispatcher }
    }
}

#[async_trait]
impl Acceptor for ServHandler {
    /// Inter-service hello: the first frame carries the dialer's service
    /// id, which becomes the channel id of this link.
    async fn accept(
        &self,
        conn: &mut dyn Conn,
        login_wait: Duration,
    ) -> filament_core::Result<(String, Meta)> {
        let frame = match timeout(login_wait, conn.read_frame()).await {
            Ok(read) => read?,
            Err(_) => return Err(Error::ReadTimeout),
        };

        let hello: InnerHandshake = payloads::decode(&frame.payload)?;

        if hello.service_id.is_empty() {
            return Err(Error::Handshake("peer announced an empty service id".into()));
        }

        info!(peer = %hello.service_id, "inter-service link accepted");

        Ok((hello.service_id, Meta::new()))
    }
}

#[async_trait]
impl MessageListener for ServHandler {
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let packet = match Packet::read_logic(&mut &payload[..]) {
            Ok(packet) => packet,
            Err(e) => {
                error!(link = %agent.id(), error = %e, "dropping undecodable packet");
                return;
            },
        };

        // login.signin carries its session in the body (it is creating
        // one); every other command resolves the caller through the
        // session store.
        let session: Session = if packet.header.command == commands::LOGIN_SIGN_IN {
            match packet.read_body() {
                Ok(session) => session,
                Err(e) => {
                    error!(link = %agent.id(), error = %e, "login without a session body");
                    return;
                },
            }
        } else {
            match self.storage.get(&packet.header.channel_id).await {
                Ok(session) => session,
                Err(Error::SessionNil) => {
                    debug!(
                        channel = %packet.header.channel_id,
                        command = %packet.header.command,
                        "no session for channel"
                    );

                    // Reply over the link the packet came in on: the
                    // gateway id is the channel id of this connection.
                    let session = Session {
                        channel_id: packet.header.channel_id.clone(),
                        gate_id: agent.id().to_owned(),
                        ..Default::default()
                    };

                    let ctx = Context::new(
                        packet,
                        session,
                        Arc::clone(&self.storage),
                        Arc::clone(&self.dispatcher),
                    );
                    ctx.resp_with_error(Status::Unauthorized, "session not found").await;

                    return;
                },
                Err(e) => {
                    error!(error = %e, "session lookup failed");
                    return;
                },
            }
        };

        let ctx = Context::new(
            packet,
            session,
            Arc::clone(&self.storage),
            Arc::clone(&self.dispatcher),
        );

        self.router.serve(ctx).await;
    }
}

#[async_trait]
impl StateListener for ServHandler {
    async fn disconnect(&self, agent: Arc<dyn Agent>) -> filament_core::Result<()> {
        info!(link = %agent.id(), "inter-service link closed");

        Ok(())
    }
}
