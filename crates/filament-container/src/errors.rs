//! Container error types.

use thiserror::Error;

/// Errors produced by the container runtime.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// `init` after `init`.
    #[error("container has initialized")]
    AlreadyInitialized,

    /// `start` before `init`, or `start` after `start`.
    #[error("container has started or is not initialized")]
    NotStartable,

    /// `shutdown` before `start`.
    #[error("container has not started")]
    NotStarted,

    /// `start` without a registry installed.
    #[error("registry is required")]
    RegistryRequired,

    /// An outbound link was requested with no dialer installed.
    #[error("dialer is required")]
    DialerRequired,

    /// A forwarded packet failed validation.
    #[error("packet is invalid: {0}")]
    InvalidPacket(&'static str),

    /// Forward to a service name with no pool.
    #[error("service {0} not found")]
    ServiceNotFound(String),

    /// The pool exists but holds no adult instance.
    #[error("no services for {0}")]
    NoServices(String),

    /// The selector named an instance the pool does not hold.
    #[error("no client found for {0}")]
    ClientNotFound(String),

    /// Inter-service links are TCP only.
    #[error("unexpected service protocol: {0}")]
    UnexpectedProtocol(String),

    /// A final-hop packet addressed to a different gateway.
    #[error("dest server is incorrect: {got} != {want}")]
    DestServerMismatch {
        /// The `dest.server` meta on the packet.
        got: String,
        /// This process's service id.
        want: String,
    },

    /// A final-hop packet without the channel list.
    #[error("dest.channels meta is missing")]
    MissingDestChannels,

    /// Fabric failure underneath the container.
    #[error(transparent)]
    Fabric(#[from] filament_core::Error),

    /// Wire codec failure.
    #[error(transparent)]
    Protocol(#[from] filament_proto::ProtocolError),

    /// Route table config failure.
    #[error("route table: {0}")]
    RouteTable(String),
}
