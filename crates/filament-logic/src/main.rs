//! Logic service binary.
//!
//! # Usage
//!
//! ```bash
//! # Login service
//! filament-logic --listen 0.0.0.0:8100 --service-id login-01 --service-name login
//!
//! # Chat service (handlers plug into the same router)
//! filament-logic --listen 0.0.0.0:8200 --service-id chat-01 --service-name chat
//! ```

use std::sync::Arc;

use clap::Parser;
use filament_container::{Container, ContainerDispatcher, Router};
use filament_core::{
    tcp::TcpUpgrader, MemoryRegistry, MemoryStorage, Server, ServiceRegistration,
};
use filament_logic::{login, ServHandler};
use filament_proto::{commands, protocols};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filament logic service
#[derive(Parser, Debug)]
#[command(name = "filament-logic")]
#[command(about = "Filament logic service")]
#[command(version)]
struct Args {
    /// Address to listen on for inter-service links
    #[arg(short, long, default_value = "0.0.0.0:8100")]
    listen: String,

    /// Unique service id
    #[arg(long, default_value = "login-01")]
    service_id: String,

    /// Service name: login or chat
    #[arg(long, default_value = "login")]
    service_name: String,

    /// Address peers reach this service on
    #[arg(long, default_value = "")]
    public_address: String,

    /// Port peers reach this service on
    #[arg(long, default_value = "0")]
    public_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let service = ServiceRegistration {
        id: args.service_id.clone(),
        name: args.service_name.clone(),
        address: args.public_address.clone(),
        port: args.public_port,
        protocol: protocols::TCP.to_owned(),
        ..Default::default()
    };

    let container = Container::new();

    let mut router = Router::new();
    router.handle(commands::LOGIN_SIGN_IN, login::sign_in);
    router.handle(commands::LOGIN_SIGN_OUT, login::sign_out);

    // The session store backend is injected here; the in-process one
    // serves single-node deployments.
    let storage = Arc::new(MemoryStorage::new());
    container.set_storage(Arc::clone(&storage) as _);

    let dispatcher = Arc::new(ContainerDispatcher::new(Arc::clone(&container)));
    let handler = Arc::new(ServHandler::new(Arc::new(router), storage as _, dispatcher as _));

    let mut server = Server::new(args.listen.clone(), service, Arc::new(TcpUpgrader));
    server.set_acceptor(Arc::clone(&handler) as _);
    server.set_message_listener(Arc::clone(&handler) as _);
    server.set_state_listener(handler as _);

    container.init(Arc::new(server), &[])?;
    container.set_registry(Arc::new(MemoryRegistry::new()));

    tracing::info!(
        id = %args.service_id,
        name = %args.service_name,
        listen = %args.listen,
        "logic service starting"
    );

    container.run().await?;

    Ok(())
}
