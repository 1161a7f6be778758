//! Destination selection over a candidate set.
//!
//! A selector is a pure function from a packet header and a candidate
//! list to one service id. Any state (zone tables, counters) lives
//! outside the lookup; implementations are safe for concurrent use.

mod hash;
mod route;

pub use hash::{hash_code, HashSelector};
pub use route::{RouteSelector, RouteTable, Zone};

use std::sync::Arc;

use filament_core::Service;
use filament_proto::Header;

/// Picks the destination instance for a packet.
pub trait Selector: Send + Sync {
    /// The service id to send to, or `None` when `services` is empty.
    fn lookup(&self, header: &Header, services: &[Arc<dyn Service>]) -> Option<String>;
}
