//! Wire types and the packet codec for the filament messaging fabric.
//!
//! Everything in this crate is pure data and codec logic: no sockets, no
//! runtime. Packets always arrive inside a transport frame, so decoding
//! works over in-memory buffers (`bytes::Buf`), never over a stream.
//!
//! Layering, bottom up:
//! - [`endian`]: length-prefixed primitives in network byte order
//! - [`frame`]: the transport frame (`opcode` + payload)
//! - [`header`]: the logic packet header with its typed meta list
//! - [`packet`]: magic-dispatched [`BasicPkt`] / [`LogicPkt`] codec
//! - [`location`] / [`session`]: cluster-visible addressing records

pub mod endian;
mod errors;
pub mod frame;
pub mod header;
pub mod location;
pub mod packet;
pub mod payloads;
mod seq;
pub mod session;

pub use errors::ProtocolError;
pub use frame::{Frame, OpCode};
pub use header::{Header, MetaEntry, MetaValue, Status};
pub use location::Location;
pub use packet::{BasicPkt, LogicPkt, Packet};
pub use seq::{Sequence, SEQ};
pub use session::Session;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Four-byte tag prefixing every logic packet on the wire.
pub const MAGIC_LOGIC_PKT: [u8; 4] = [0xc3, 0x11, 0xa3, 0x65];

/// Four-byte tag prefixing every basic packet on the wire.
pub const MAGIC_BASIC_PKT: [u8; 4] = [0xc3, 0x15, 0xa7, 0x65];

/// Commands fixed across the cluster. The fabric treats them as opaque
/// routing keys; only the segment before the first `.` matters to it.
pub mod commands {
    /// Authenticate a connection and create a session.
    pub const LOGIN_SIGN_IN: &str = "login.signin";
    /// Tear down a session on disconnect or explicit logout.
    pub const LOGIN_SIGN_OUT: &str = "login.signout";

    /// Single-user chat message.
    pub const CHAT_USER_TALK: &str = "chat.user.talk";
    /// Group chat message.
    pub const CHAT_GROUP_TALK: &str = "chat.group.talk";
    /// Delivery acknowledgement.
    pub const CHAT_TALK_ACK: &str = "chat.talk.ack";

    /// Download the offline message index.
    pub const OFFLINE_INDEX: &str = "chat.offline.index";
    /// Download offline message content.
    pub const OFFLINE_CONTENT: &str = "chat.offline.context";

    /// Create a group.
    pub const GROUP_CREATE: &str = "chat.group.create";
    /// Join a group.
    pub const GROUP_JOIN: &str = "chat.group.join";
    /// Quit a group.
    pub const GROUP_QUIT: &str = "chat.group.quit";
    /// List group members.
    pub const GROUP_MEMBERS: &str = "chat.group.members";
    /// Group detail.
    pub const GROUP_DETAIL: &str = "chat.group.detail";
}

/// Service names registered in the service registry.
pub mod service_names {
    /// WebSocket gateway.
    pub const WGATEWAY: &str = "wgateway";
    /// Raw TCP gateway.
    pub const TGATEWAY: &str = "tgateway";
    /// Login service.
    pub const LOGIN: &str = "login";
    /// Chat service.
    pub const CHAT: &str = "chat";
    /// Database-facing RPC service.
    pub const SERVICE: &str = "service";
}

/// Meta keys reserved by the fabric, on packets and on service records.
pub mod meta_keys {
    /// Destination gateway id for final-hop delivery (packet meta).
    pub const DEST_SERVER: &str = "dest.server";
    /// Comma-separated channel ids on that gateway (packet meta).
    pub const DEST_CHANNELS: &str = "dest.channels";
    /// App the account belongs to (packet meta, set by the gateway).
    pub const APP: &str = "app";
    /// Account behind the channel (packet meta, set by the gateway).
    pub const ACCOUNT: &str = "account";

    /// `young` or `adult` on service meta.
    pub const SERVICE_STATE: &str = "service_state";
    /// `tcp` or `websocket` on service meta.
    pub const PROTOCOL: &str = "protocol";
    /// Optional health-check endpoint on service meta.
    pub const HEALTH_URL: &str = "health_url";
    /// Optional zone label on service meta.
    pub const ZONE: &str = "zone";
    /// Optional public domain on service meta.
    pub const DOMAIN: &str = "domain";
}

/// Transport protocol names carried in service meta.
pub mod protocols {
    /// Raw framed TCP.
    pub const TCP: &str = "tcp";
    /// WebSocket.
    pub const WEBSOCKET: &str = "websocket";
}

/// Offline-sync tuning shared across the cluster.
pub mod offline {
    use std::time::Duration;

    /// How long a read acknowledgement index stays cached.
    pub const READ_INDEX_EXPIRES_IN: Duration = Duration::from_secs(60 * 60 * 24 * 30);
    /// Message indexes returned per sync request.
    pub const SYNC_INDEX_COUNT: u32 = 2000;
    /// Message bodies returned per content page.
    pub const MAX_COUNT_PER_PAGE: u32 = 200;
}
