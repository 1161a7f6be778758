//! Logic service library.
//!
//! A logic service accepts inter-service links from gateways (the link's
//! channel id is the gateway's service id), routes decoded packets to
//! command handlers, and pushes results back through the gateway's own
//! link.

pub mod handler;
pub mod login;

pub use handler::ServHandler;
