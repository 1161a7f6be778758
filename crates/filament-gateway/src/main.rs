//! Gateway binary.
//!
//! # Usage
//!
//! ```bash
//! # WebSocket gateway in zone z1
//! filament-gateway --listen 0.0.0.0:8000 --service-id wgateway-01 --zone z1
//!
//! # Raw TCP gateway with a zone routing table
//! filament-gateway --listen 0.0.0.0:8000 --protocol tcp \
//!     --service-id tgateway-01 --route route.json
//! ```

use std::sync::Arc;

use clap::Parser;
use filament_container::{Container, RouteSelector, RouteTable};
use filament_core::{
    tcp::TcpUpgrader, websocket::WsUpgrader, MemoryRegistry, Server, ServiceRegistration, Upgrader,
};
use filament_gateway::{token, Handler, TcpDialer};
use filament_proto::{meta_keys, protocols, service_names};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filament gateway
#[derive(Parser, Debug)]
#[command(name = "filament-gateway")]
#[command(about = "Filament messaging gateway")]
#[command(version)]
struct Args {
    /// Address to listen on for end-user connections
    #[arg(short, long, default_value = "0.0.0.0:8000")]
    listen: String,

    /// Client-facing protocol: ws or tcp
    #[arg(short, long, default_value = "ws")]
    protocol: String,

    /// Unique service id
    #[arg(long, default_value = "wgateway-01")]
    service_id: String,

    /// Address peers and clients reach this gateway on
    #[arg(long, default_value = "")]
    public_address: String,

    /// Port peers and clients reach this gateway on
    #[arg(long, default_value = "0")]
    public_port: u16,

    /// Zone this gateway runs in
    #[arg(long, default_value = "")]
    zone: String,

    /// Public domain announced in the registry
    #[arg(long, default_value = "")]
    domain: String,

    /// Path to a JSON route table; hash selection when absent
    #[arg(long)]
    route: Option<String>,

    /// Login token secret
    #[arg(long, default_value = token::DEFAULT_SECRET)]
    secret: String,

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

    let (upgrader, service_name): (Arc<dyn Upgrader>, &str) = match args.protocol.as_str() {
        "tcp" => (Arc::new(TcpUpgrader), service_names::TGATEWAY),
        _ => (Arc::new(WsUpgrader), service_names::WGATEWAY),
    };

    let mut meta = filament_core::Meta::new();
    if !args.zone.is_empty() {
        meta.insert(meta_keys::ZONE.to_owned(), args.zone.clone());
    }
    if !args.domain.is_empty() {
        meta.insert(meta_keys::DOMAIN.to_owned(), args.domain.clone());
    }

    let service = ServiceRegistration {
        id: args.service_id.clone(),
        name: service_name.to_owned(),
        address: args.public_address.clone(),
        port: args.public_port,
        protocol: if args.protocol == "tcp" {
            protocols::TCP.to_owned()
        } else {
            protocols::WEBSOCKET.to_owned()
        },
        meta,
        ..Default::default()
    };

    let container = Container::new();
    let handler = Arc::new(Handler::new(
        args.service_id.clone(),
        args.secret.clone(),
        Arc::clone(&container),
    ));

    let mut server = Server::new(args.listen.clone(), service, upgrader);
    server.set_acceptor(Arc::clone(&handler) as _);
    server.set_message_listener(Arc::clone(&handler) as _);
    server.set_state_listener(handler as _);

    container.init(
        Arc::new(server),
        &[service_names::LOGIN, service_names::CHAT],
    )?;

    // The registry backend is injected here; the in-process one serves
    // single-node deployments.
    container.set_registry(Arc::new(MemoryRegistry::new()));
    container.set_dialer(Arc::new(TcpDialer::new(args.service_id.clone())));

    if let Some(path) = &args.route {
        let table = RouteTable::from_file(path)?;
        container.set_selector(Arc::new(RouteSelector::new(table)));
    }

    tracing::info!(id = %args.service_id, listen = %args.listen, "gateway starting");

    container.run().await?;

    Ok(())
}
