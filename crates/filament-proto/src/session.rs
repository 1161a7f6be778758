//! Cluster-visible record of an authenticated connection.

use serde::{Deserialize, Serialize};

use crate::Location;

/// Written to the session store by the login handler, expired by TTL,
/// deleted on logout or evicted by a second login for the same account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Session {
    /// Gateway-scoped channel identity.
    pub channel_id: String,
    /// Gateway service id.
    pub gate_id: String,
    /// Authenticated account.
    pub account: String,
    /// App the account belongs to.
    pub app: String,
    /// Device label; empty means the account's single default device.
    #[serde(default)]
    pub device: String,
    /// Peer address as seen by the gateway, without the port.
    #[serde(default)]
    pub remote_ip: String,
    /// Zone the gateway runs in.
    #[serde(default)]
    pub zone: String,
    /// Carrier, when known.
    #[serde(default)]
    pub isp: String,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Session {
    /// The compact address projection of this session.
    pub fn location(&self) -> Location {
        Location { channel_id: self.channel_id.clone(), gate_id: self.gate_id.clone() }
    }
}
