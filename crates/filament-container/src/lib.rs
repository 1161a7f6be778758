//! Process runtime for filament services.
//!
//! A [`Container`] composes the local [`Server`](filament_core::Server),
//! a [`Registry`](filament_core::Registry) subscription per dependent
//! service, an outbound [`Clients`] pool per dependency, and a pluggable
//! [`Selector`] that picks the destination instance for each forwarded
//! packet.
//!
//! The container is a dependency-injected root: construct one per
//! process, wire it, [`Container::start`] it. There is no global state.

pub mod clients;
mod container;
pub mod dispatcher;
mod errors;
pub mod router;
pub mod selector;

pub use clients::{ClientMap, Clients};
pub use container::{Container, DEFAULT_WARMUP};
pub use dispatcher::{ContainerDispatcher, Dispatcher};
pub use errors::ContainerError;
pub use router::{Context, Router};
pub use selector::{HashSelector, RouteSelector, RouteTable, Selector, Zone};

/// Result alias for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Service-meta value for an instance inside its warmup window.
pub const STATE_YOUNG: &str = "young";

/// Service-meta value for an instance eligible for selection.
pub const STATE_ADULT: &str = "adult";
