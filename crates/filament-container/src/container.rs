//! The process runtime.
//!
//! Lifecycle: *uninitialized → initialized → started → closed*, each
//! transition a CAS; reverse transitions are errors. `start` launches the
//! local server, wires one registry watch plus one client pool per
//! dependency, and registers the local service. Packets then flow:
//!
//! - outbound: [`Container::forward`] → selector → pool client → peer
//! - inbound (on a gateway): pool read loop → [`Container::push_message`]
//!   → local server channels
//! - local (on a logic service): [`Container::push`] → the inbound channel
//!   the destination gateway already holds on this server

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, PoisonError, RwLock, Weak,
    },
    time::Duration,
};

use dashmap::DashMap;
use filament_core::{
    Client, ClientOptions, Dialer, Registry, Server, ServiceRegistration, SessionStorage,
    DEFAULT_HEARTBEAT, DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT,
};
use filament_proto::{meta_keys, packet, protocols, LogicPkt, OpCode, Packet};
use tokio::{sync::Mutex, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    clients::{ClientMap, Clients},
    selector::{HashSelector, Selector},
    ContainerError, Result, STATE_ADULT, STATE_YOUNG,
};

const STATE_UNINITIALIZED: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_STARTED: u8 = 2;
const STATE_CLOSED: u8 = 3;

/// How long a newly discovered instance stays `young` before it is
/// eligible for selection. The window lets its inbound link finish
/// racing its registration.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(10);

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// The process runtime root. One per process, dependency-injected.
pub struct Container {
    // Self-handle for registry callbacks and per-link tasks; they hold
    // it weakly so a dropped container ends them instead of leaking.
    me: Weak<Self>,
    state: AtomicU8,
    server: RwLock<Option<Arc<Server>>>,
    registry: RwLock<Option<Arc<dyn Registry>>>,
    dialer: RwLock<Option<Arc<dyn Dialer>>>,
    selector: RwLock<Arc<dyn Selector>>,
    storage: RwLock<Option<Arc<dyn SessionStorage>>>,
    deps: RwLock<HashSet<String>>,
    pools: DashMap<String, Arc<Clients>>,
    warmup: RwLock<Duration>,
    // Serializes build_client so a watch notification and the initial
    // find cannot both dial the same instance.
    build_lock: Mutex<()>,
}

impl Container {
    /// An uninitialized container with the hash selector installed.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: AtomicU8::new(STATE_UNINITIALIZED),
            server: RwLock::new(None),
            registry: RwLock::new(None),
            dialer: RwLock::new(None),
            selector: RwLock::new(Arc::new(HashSelector)),
            storage: RwLock::new(None),
            deps: RwLock::new(HashSet::new()),
            pools: DashMap::new(),
            warmup: RwLock::new(DEFAULT_WARMUP),
            build_lock: Mutex::new(()),
        })
    }

    /// Record the local server and the dependent service names. First
    /// lifecycle transition; calling it twice is an error.
    pub fn init(&self, server: Arc<Server>, deps: &[&str]) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_UNINITIALIZED,
                STATE_INITIALIZED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(ContainerError::AlreadyInitialized);
        }

        info!(
            id = %server.service().id,
            name = %server.service().name,
            ?deps,
            "container init"
        );

        *write(&self.server) = Some(server);
        write(&self.deps).extend(deps.iter().map(|&d| d.to_owned()));

        Ok(())
    }

    /// Install the inter-service dialer.
    pub fn set_dialer(&self, dialer: Arc<dyn Dialer>) {
        *write(&self.dialer) = Some(dialer);
    }

    /// Replace the default [`HashSelector`].
    pub fn set_selector(&self, selector: Arc<dyn Selector>) {
        *write(&self.selector) = selector;
    }

    /// Install the service registry. Required before [`Container::start`].
    pub fn set_registry(&self, registry: Arc<dyn Registry>) {
        *write(&self.registry) = Some(registry);
    }

    /// Install the session store handlers reach through the router.
    pub fn set_storage(&self, storage: Arc<dyn SessionStorage>) {
        *write(&self.storage) = Some(storage);
    }

    /// Override the young → adult warmup window.
    pub fn set_warmup(&self, warmup: Duration) {
        *write(&self.warmup) = warmup;
    }

    /// The local server.
    pub fn server(&self) -> Result<Arc<Server>> {
        read(&self.server).clone().ok_or(ContainerError::NotStartable)
    }

    /// The session store, when one is installed.
    pub fn storage(&self) -> Option<Arc<dyn SessionStorage>> {
        read(&self.storage).clone()
    }

    /// This process's service id.
    pub fn service_id(&self) -> Result<String> {
        Ok(self.server()?.service().id.clone())
    }

    /// Launch the server, wire the dependency pools, register the local
    /// service. Returns once wiring is in place; the server and the
    /// watches keep running on their own tasks.
    pub async fn start(&self) -> Result<()> {
        let registry = read(&self.registry)
            .clone()
            .ok_or(ContainerError::RegistryRequired)?;

        if self
            .state
            .compare_exchange(
                STATE_INITIALIZED,
                STATE_STARTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(ContainerError::NotStartable);
        }

        let server = self.server()?;

        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(e) = runner.start().await {
                warn!(error = %e, "server stopped");
            }
        });

        let deps: Vec<String> = read(&self.deps).iter().cloned().collect();
        for dep in deps {
            self.connect_to_service(&registry, &dep).await?;
        }

        if server.service().has_public_endpoint() {
            if let Err(e) = registry.register(server.service().clone()).await {
                warn!(error = %e, "service registration failed");
            }
        }

        Ok(())
    }

    /// [`Container::start`], then park until ctrl-c, then
    /// [`Container::shutdown`]. The entrypoint binaries use.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "signal wait failed");
        }

        info!("termination signal received");

        self.shutdown().await
    }

    /// Stop the server, deregister, drop the watches. Idempotent once
    /// started; an error before that.
    pub async fn shutdown(&self) -> Result<()> {
        if self.state.load(Ordering::SeqCst) == STATE_CLOSED {
            return Ok(());
        }

        if self
            .state
            .compare_exchange(STATE_STARTED, STATE_CLOSED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ContainerError::NotStarted);
        }

        let server = self.server()?;

        if timeout(SHUTDOWN_BUDGET, server.shutdown()).await.is_err() {
            warn!("server shutdown exceeded its budget");
        }

        if let Some(registry) = read(&self.registry).clone() {
            if let Err(e) = registry.deregister(&server.service().id).await {
                warn!(error = %e, "deregister failed");
            }

            let deps: Vec<String> = read(&self.deps).iter().cloned().collect();
            for dep in deps {
                let _ = registry.unsubscribe(&dep).await;
            }
        }

        info!("shutdown");

        Ok(())
    }

    /// Forward a packet to `service_name` using the container's selector.
    pub async fn forward(&self, service_name: &str, packet: LogicPkt) -> Result<()> {
        let selector = read(&self.selector).clone();

        self.forward_with_selector(service_name, packet, selector.as_ref()).await
    }

    /// Forward a packet with an explicit selector.
    pub async fn forward_with_selector(
        &self,
        service_name: &str,
        mut packet: LogicPkt,
        selector: &dyn Selector,
    ) -> Result<()> {
        if packet.header.command.is_empty() {
            return Err(ContainerError::InvalidPacket("command is empty"));
        }

        if packet.header.channel_id.is_empty() {
            return Err(ContainerError::InvalidPacket("channel id is empty"));
        }

        let client = self.lookup(service_name, &packet, selector)?;

        packet
            .header
            .add_string_meta(meta_keys::DEST_SERVER, self.service_id()?);

        debug!(
            to = %client.id(),
            command = %packet.header.command,
            "forward"
        );

        let wire = packet::marshal_logic(&packet)?;
        client.send(&wire).await?;

        Ok(())
    }

    fn lookup(
        &self,
        service_name: &str,
        packet: &LogicPkt,
        selector: &dyn Selector,
    ) -> Result<Arc<Client>> {
        let pool = self
            .pools
            .get(service_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ContainerError::ServiceNotFound(service_name.to_owned()))?;

        // Only adult instances take traffic; young ones are still inside
        // their warmup window.
        let services = pool.services_with_meta(meta_keys::SERVICE_STATE, STATE_ADULT);
        if services.is_empty() {
            return Err(ContainerError::NoServices(service_name.to_owned()));
        }

        let id = selector
            .lookup(&packet.header, &services)
            .ok_or_else(|| ContainerError::NoServices(service_name.to_owned()))?;

        pool.get(&id).ok_or(ContainerError::ClientNotFound(id))
    }

    /// Deliver a packet out of the channel this server already holds for
    /// `server` (on a logic service, inter-service links are inbound
    /// channels keyed by the peer's service id).
    pub async fn push(&self, server: &str, mut packet: LogicPkt) -> Result<()> {
        packet.header.add_string_meta(meta_keys::DEST_SERVER, server);

        let wire = packet::marshal_logic(&packet)?;
        self.server()?.push(server, wire.to_vec()).await?;

        Ok(())
    }

    async fn connect_to_service(
        &self,
        registry: &Arc<dyn Registry>,
        name: &str,
    ) -> Result<()> {
        let pool = Arc::new(Clients::new());
        self.pools.insert(name.to_owned(), Arc::clone(&pool));

        // Watch additions first so nothing slips between find and watch.
        let watcher = self.me.clone();
        let watch_pool = Arc::clone(&pool);
        registry
            .subscribe(
                name,
                Arc::new(move |services| {
                    let Some(container) = watcher.upgrade() else {
                        return;
                    };

                    for service in services {
                        if watch_pool.get(&service.id).is_some() {
                            continue;
                        }

                        info!(id = %service.id, name = %service.name, "watched a new service");

                        let container = Arc::clone(&container);
                        let pool = Arc::clone(&watch_pool);
                        tokio::spawn(async move {
                            if let Err(e) =
                                container.build_client(&pool, service, STATE_YOUNG).await
                            {
                                warn!(error = %e, "build client failed");
                            }
                        });
                    }
                }),
            )
            .await?;

        // Instances listed now were healthy before this process started;
        // they take traffic immediately.
        let found = registry.find(name, &[]).await?;
        info!(name, count = found.len(), "found existing services");

        for service in found {
            if let Err(e) = self.build_client(&pool, service, STATE_ADULT).await {
                warn!(error = %e, "build client failed");
            }
        }

        Ok(())
    }

    async fn build_client(
        &self,
        pool: &Arc<Clients>,
        registration: ServiceRegistration,
        state: &'static str,
    ) -> Result<()> {
        let _guard = self.build_lock.lock().await;

        if pool.get(&registration.id).is_some() {
            return Ok(());
        }

        // Inter-service links speak raw framed TCP only.
        if registration.protocol != protocols::TCP {
            return Err(ContainerError::UnexpectedProtocol(registration.protocol));
        }

        let dialer = read(&self.dialer)
            .clone()
            .ok_or(ContainerError::DialerRequired)?;

        let client = Client::with_meta(
            registration.id.clone(),
            registration.name.clone(),
            registration.meta.clone(),
            ClientOptions {
                heartbeat: Some(DEFAULT_HEARTBEAT),
                read_wait: DEFAULT_READ_WAIT,
                write_wait: DEFAULT_WRITE_WAIT,
            },
        );
        client.set_meta(meta_keys::SERVICE_STATE, state);
        client.set_dialer(dialer);

        if state == STATE_YOUNG {
            let warming = Arc::clone(&client);
            let warmup = *read(&self.warmup);
            tokio::spawn(async move {
                tokio::time::sleep(warmup).await;
                warming.set_meta(meta_keys::SERVICE_STATE, STATE_ADULT);
            });
        }

        client.connect(&registration.dial_url()).await?;

        let reaper_pool = Arc::clone(pool);
        let reaper = self.me.clone();
        let looped = Arc::clone(&client);
        tokio::spawn(async move {
            if let Some(container) = reaper.upgrade() {
                if let Err(e) = container.read_loop(&looped).await {
                    debug!(id = %looped.id(), error = %e, "client read loop stopped");
                }
            }

            // Dead links are removed, not retried; the next registry
            // notification rebuilds them.
            reaper_pool.remove(looped.id());
            looped.close().await;
        });

        pool.add(client);

        Ok(())
    }

    async fn read_loop(&self, client: &Arc<Client>) -> Result<()> {
        info!(id = %client.id(), name = %client.name(), "client read loop started");

        loop {
            let frame = client.read().await?;

            if frame.opcode != OpCode::Binary {
                continue;
            }

            let packet = match Packet::read_logic(&mut &frame.payload[..]) {
                Ok(packet) => packet,
                Err(e) => {
                    debug!(error = %e, "dropping undecodable packet");
                    continue;
                },
            };

            if let Err(e) = self.push_message(packet).await {
                debug!(error = %e, "push message failed");
            }
        }
    }

    /// Final-hop delivery: validate the destination metas, strip them,
    /// push to every named channel.
    pub async fn push_message(&self, mut packet: LogicPkt) -> Result<()> {
        let local = self.service_id()?;

        let server = packet
            .header
            .get_string_meta(meta_keys::DEST_SERVER)
            .unwrap_or_default()
            .to_owned();
        if server != local {
            return Err(ContainerError::DestServerMismatch { got: server, want: local });
        }

        let channels = packet
            .header
            .get_string_meta(meta_keys::DEST_CHANNELS)
            .ok_or(ContainerError::MissingDestChannels)?
            .to_owned();

        // Address labels, not payload; the client must not see them.
        packet.header.del_meta(meta_keys::DEST_SERVER);
        packet.header.del_meta(meta_keys::DEST_CHANNELS);

        let wire = packet::marshal_logic(&packet)?;
        let server = self.server()?;

        debug!(channels = %channels, command = %packet.header.command, "push to channels");

        for channel in channels.split(',') {
            if let Err(e) = server.push(channel, wire.to_vec()).await {
                debug!(channel, error = %e, "push failed");
            }
        }

        Ok(())
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
