//! Command routing boundary for logic services.
//!
//! The fabric delivers decoded packets here; business handlers register
//! per command and receive a [`Context`] that carries the packet, the
//! caller's session, the session store and the outbound dispatcher.
//! Handlers respond through the context, never through raw channels.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use filament_proto::{Location, LogicPkt, Session, Status};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, warn};

use crate::{dispatcher::Dispatcher, Result};
use filament_core::SessionStorage;

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type HandlerFn = Arc<dyn Fn(Context) -> HandlerFuture + Send + Sync>;

/// Everything one command invocation may touch.
pub struct Context {
    packet: LogicPkt,
    session: Session,
    storage: Arc<dyn SessionStorage>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Context {
    /// Assemble a context for one inbound packet.
    pub fn new(
        packet: LogicPkt,
        session: Session,
        storage: Arc<dyn SessionStorage>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self { packet, session, storage, dispatcher }
    }

    /// The inbound packet header.
    pub fn header(&self) -> &filament_proto::Header {
        &self.packet.header
    }

    /// The caller's session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Decode the packet body into the record the command expects.
    pub fn read_body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(self.packet.read_body()?)
    }

    /// The session store.
    pub fn storage(&self) -> &Arc<dyn SessionStorage> {
        &self.storage
    }

    /// Location of `account`, or `Err(SessionNil)` when offline.
    pub async fn get_location(&self, account: &str, device: &str) -> Result<Location> {
        Ok(self.storage.get_location(account, device).await?)
    }

    /// Reply to the caller: same command and sequence, the given status
    /// and body, routed back to the source gateway channel.
    pub async fn resp<T: Serialize>(&self, status: Status, body: Option<&T>) -> Result<()> {
        let mut reply = LogicPkt::from_header(&self.packet.header).with_status(status);

        if let Some(body) = body {
            reply = reply.write_body(body)?;
        }

        self.dispatcher
            .push(
                &self.session.gate_id,
                &[self.session.channel_id.clone()],
                reply,
            )
            .await
    }

    /// Log `error` and reply with `status` and no body.
    pub async fn resp_with_error(&self, status: Status, error: impl std::fmt::Display) {
        warn!(
            command = %self.packet.header.command,
            channel = %self.session.channel_id,
            %error,
            "responding with {status:?}"
        );

        if let Err(e) = self.resp::<()>(status, None).await {
            error!(error = %e, "error response failed");
        }
    }

    /// Push `body` under the current command to arbitrary locations,
    /// grouped per gateway.
    pub async fn dispatch<T: Serialize>(&self, body: &T, locations: &[Location]) -> Result<()> {
        let packet = LogicPkt::from_header(&self.packet.header).write_body(body)?;

        let mut per_gateway: HashMap<&str, Vec<String>> = HashMap::new();
        for location in locations {
            per_gateway
                .entry(location.gate_id.as_str())
                .or_default()
                .push(location.channel_id.clone());
        }

        for (gateway, channels) in per_gateway {
            self.dispatcher.push(gateway, &channels, packet.clone()).await?;
        }

        Ok(())
    }
}

/// Command → handler map.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, HandlerFn>,
}

impl Router {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `command`. Registration happens at wiring
    /// time, before the router is shared.
    pub fn handle<F, Fut>(&mut self, command: impl Into<String>, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .insert(command.into(), Arc::new(move |ctx| Box::pin(handler(ctx))));
    }

    /// Dispatch one inbound packet. An unknown command is answered with
    /// [`Status::InvalidCommand`].
    pub async fn serve(&self, ctx: Context) {
        let command = ctx.packet.header.command.clone();

        match self.handlers.get(&command) {
            Some(handler) => handler(ctx).await,
            None => {
                warn!(command, "no handler registered");
                ctx.resp_with_error(Status::InvalidCommand, "no handler registered").await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use filament_core::MemoryStorage;
    use filament_proto::{commands, payloads::LoginResponse};

    use super::*;

    #[derive(Default)]
    struct RecordingDispatcher {
        pushed: Mutex<Vec<(String, Vec<String>, LogicPkt)>>,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn push(
            &self,
            gateway: &str,
            channels: &[String],
            packet: LogicPkt,
        ) -> Result<()> {
            self.pushed
                .lock()
                .unwrap()
                .push((gateway.to_owned(), channels.to_vec(), packet));

            Ok(())
        }
    }

    fn context(dispatcher: Arc<RecordingDispatcher>, command: &str) -> Context {
        let session = Session {
            channel_id: "g1_u1_1".into(),
            gate_id: "g1".into(),
            account: "u1".into(),
            ..Default::default()
        };

        Context::new(
            LogicPkt::new(command).with_channel("g1_u1_1"),
            session,
            Arc::new(MemoryStorage::new()),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn resp_routes_back_to_the_source_gateway() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let ctx = context(Arc::clone(&dispatcher), commands::LOGIN_SIGN_IN);

        ctx.resp(Status::Success, Some(&LoginResponse { channel_id: "g1_u1_1".into() }))
            .await
            .unwrap();

        let pushed = dispatcher.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);

        let (gateway, channels, packet) = &pushed[0];
        assert_eq!(gateway, "g1");
        assert_eq!(channels, &vec!["g1_u1_1".to_owned()]);
        assert_eq!(packet.header.status, Status::Success);
        assert_eq!(packet.header.command, commands::LOGIN_SIGN_IN);
    }

    #[tokio::test]
    async fn dispatch_groups_locations_per_gateway() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let ctx = context(Arc::clone(&dispatcher), commands::CHAT_USER_TALK);

        let locations = vec![
            Location { channel_id: "a".into(), gate_id: "g1".into() },
            Location { channel_id: "b".into(), gate_id: "g2".into() },
            Location { channel_id: "c".into(), gate_id: "g1".into() },
        ];

        ctx.dispatch(&LoginResponse::default(), &locations).await.unwrap();

        let pushed = dispatcher.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 2);

        let g1 = pushed.iter().find(|(g, _, _)| g == "g1").unwrap();
        assert_eq!(g1.1, vec!["a".to_owned(), "c".to_owned()]);
    }

    #[tokio::test]
    async fn unknown_command_is_answered_with_invalid_command() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut router = Router::new();
        router.handle(commands::LOGIN_SIGN_IN, |_ctx| async {});

        router.serve(context(Arc::clone(&dispatcher), "chat.unknown")).await;

        let pushed = dispatcher.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].2.header.status, Status::InvalidCommand);
    }

    #[tokio::test]
    async fn registered_handler_runs() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let mut router = Router::new();

        router.handle(commands::LOGIN_SIGN_IN, |ctx: Context| async move {
            let _ = ctx.resp::<()>(Status::Success, None).await;
        });

        router.serve(context(Arc::clone(&dispatcher), commands::LOGIN_SIGN_IN)).await;

        let pushed = dispatcher.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].2.header.status, Status::Success);
    }
}
