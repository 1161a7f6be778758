//! Gateway edge handler: authenticate, relay, notify.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use filament_container::Container;
use filament_core::{Acceptor, Agent, Conn, Error, MessageListener, Meta, StateListener};
use filament_proto::{
    commands, meta_keys,
    packet::{self, CODE_PING, CODE_PONG},
    payloads::LoginRequest,
    BasicPkt, LogicPkt, OpCode, Packet, Session, Status, SEQ,
};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::token;

/// The gateway's acceptor, message listener and state listener in one
/// object, mirroring the three seams the server exposes.
pub struct Handler {
    service_id: String,
    secret: String,
    container: Arc<Container>,
}

impl Handler {
    /// A handler for the gateway `service_id`, verifying login tokens
    /// with `secret`.
    pub fn new(
        service_id: impl Into<String>,
        secret: impl Into<String>,
        container: Arc<Container>,
    ) -> Self {
        Self { service_id: service_id.into(), secret: secret.into(), container }
    }

    fn generate_channel_id(&self, account: &str) -> String {
        format!("{}_{}_{}", self.service_id, account, SEQ.next())
    }

    async fn refuse(conn: &mut dyn Conn, request: &LogicPkt, status: Status) {
        let resp = LogicPkt::from_header(&request.header).with_status(status);

        if let Ok(wire) = packet::marshal_logic(&resp) {
            let _ = conn.write_frame(OpCode::Binary, &wire).await;
            let _ = conn.flush().await;
        }
    }
}

#[async_trait]
impl Acceptor for Handler {
    /// Read the login packet within the deadline, verify the token,
    /// assign a channel id and forward the enriched login to the login
    /// service.
    async fn accept(
        &self,
        conn: &mut dyn Conn,
        login_wait: Duration,
    ) -> filament_core::Result<(String, Meta)> {
        let frame = match timeout(login_wait, conn.read_frame()).await {
            Ok(read) => read?,
            Err(_) => return Err(Error::ReadTimeout),
        };

        let mut request = Packet::read_logic(&mut &frame.payload[..])?;

        if request.header.command != commands::LOGIN_SIGN_IN {
            Self::refuse(conn, &request, Status::InvalidCommand).await;

            return Err(Error::Unauthorized("must be a login.signin command".into()));
        }

        let login: LoginRequest = request.read_body()?;

        let token = match token::parse(&self.secret, &login.token) {
            Ok(token) => token,
            Err(e) => {
                Self::refuse(conn, &request, Status::Unauthorized).await;

                return Err(Error::Unauthorized(e.to_string()));
            },
        };

        let channel_id = self.generate_channel_id(&token.account);

        let remote_ip = conn
            .remote_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();

        // The login service receives a full session record, not the raw
        // token: the gateway is the only party that knows the transport
        // facts.
        let session = Session {
            channel_id: channel_id.clone(),
            gate_id: self.service_id.clone(),
            account: token.account.clone(),
            app: token.app.clone(),
            remote_ip,
            tags: login.tags,
            ..Default::default()
        };

        request.header.channel_id = channel_id.clone();
        let request = request
            .write_body(&session)
            .map_err(filament_core::Error::from)?;

        self.container
            .forward(filament_proto::service_names::LOGIN, request)
            .await
            .map_err(|e| Error::Handshake(e.to_string()))?;

        let mut meta = Meta::new();
        meta.insert(meta_keys::ACCOUNT.to_owned(), token.account);
        meta.insert(meta_keys::APP.to_owned(), token.app);

        Ok((channel_id, meta))
    }
}

#[async_trait]
impl MessageListener for Handler {
    /// Relay one inbound payload: answer application heartbeats locally,
    /// forward logic packets to the service their command names.
    async fn receive(&self, agent: Arc<dyn Agent>, payload: Bytes) {
        let parsed = match Packet::read(&mut &payload[..]) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(id = %agent.id(), error = %e, "dropping undecodable payload");
                return;
            },
        };

        match parsed {
            Packet::Basic(ping) => {
                if ping.code == CODE_PING {
                    if let Ok(pong) = packet::marshal_basic(&BasicPkt::new(CODE_PONG)) {
                        let _ = agent.push(pong.to_vec()).await;
                    }
                }
            },
            Packet::Logic(mut logic) => {
                logic.header.channel_id = agent.id().to_owned();

                // Stamp the routing facts the zone selector keys on.
                if let Some(app) = agent.meta().get(meta_keys::APP) {
                    logic.header.add_string_meta(meta_keys::APP, app);
                }
                if let Some(account) = agent.meta().get(meta_keys::ACCOUNT) {
                    logic.header.add_string_meta(meta_keys::ACCOUNT, account);
                }

                let service = logic.service_name().to_owned();
                let command = logic.header.command.clone();
                let dest = logic.header.dest.clone();

                if let Err(e) = self.container.forward(&service, logic).await {
                    error!(
                        id = %agent.id(),
                        cmd = %command,
                        dest = %dest,
                        error = %e,
                        "forward failed"
                    );
                }
            },
        }
    }
}

#[async_trait]
impl StateListener for Handler {
    /// Turn a disconnect into a `login.signout` so the session store is
    /// cleaned up cluster-wide.
    async fn disconnect(&self, agent: Arc<dyn Agent>) -> filament_core::Result<()> {
        info!(id = %agent.id(), "disconnect");

        let logout =
            LogicPkt::new(commands::LOGIN_SIGN_OUT).with_channel(agent.id().to_owned());

        if let Err(e) = self
            .container
            .forward(filament_proto::service_names::LOGIN, logout)
            .await
        {
            warn!(id = %agent.id(), error = %e, "signout forward failed");
        }

        Ok(())
    }
}
