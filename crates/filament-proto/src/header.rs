//! Logic packet header and its typed meta list.

use serde::{Deserialize, Serialize};

/// Outcome of a command, set by the responding service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Status {
    /// Command handled.
    #[default]
    Success,
    /// The destination account or group does not resolve.
    NoDestination,
    /// No handler is registered for the command.
    InvalidCommand,
    /// The body did not deserialize into the record the command expects.
    InvalidPacketBody,
    /// Authentication failed or the session expired.
    Unauthorized,
    /// Unexpected server-side failure.
    SystemException,
}

/// A typed meta value.
///
/// The declared type travels on the wire so receivers convert without
/// guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    /// UTF-8 string.
    String(String),
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
}

impl MetaValue {
    /// The string form, if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// One key/value entry on the header meta list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    /// Meta key; fabric-reserved keys live in [`crate::meta_keys`].
    pub key: String,
    /// Typed value.
    pub value: MetaValue,
}

/// The routing header carried by every [`crate::LogicPkt`].
///
/// Serialized as a CBOR record inside the packet, length-prefixed, so
/// readers tolerate unknown fields at the record level.
///
/// Meta is an ordered list. Insertion appends and does not dedupe;
/// duplicate keys are permitted, and [`Header::get_meta`] /
/// [`Header::del_meta`] operate on the first match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Header {
    /// Command, e.g. `chat.user.talk`. The segment before the first `.`
    /// names the service that handles it.
    pub command: String,
    /// Gateway-scoped channel identity of the originating connection.
    pub channel_id: String,
    /// Monotonically increasing within a server process.
    pub sequence: u32,
    /// Command outcome; meaningful on responses.
    pub status: Status,
    /// Account id, group id, or empty.
    pub dest: String,
    /// Ordered key/typed-value list.
    pub meta: Vec<MetaEntry>,
}

impl Header {
    /// Append a string meta entry.
    pub fn add_string_meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.meta.push(MetaEntry { key: key.into(), value: MetaValue::String(value.into()) });
    }

    /// First value stored under `key`.
    pub fn get_meta(&self, key: &str) -> Option<&MetaValue> {
        self.meta.iter().find(|entry| entry.key == key).map(|entry| &entry.value)
    }

    /// First *string* value stored under `key`.
    pub fn get_string_meta(&self, key: &str) -> Option<&str> {
        self.get_meta(key).and_then(MetaValue::as_str)
    }

    /// Remove the first entry stored under `key`. Returns whether an entry
    /// was removed. Later duplicates survive.
    pub fn del_meta(&mut self, key: &str) -> bool {
        match self.meta.iter().position(|entry| entry.key == key) {
            Some(idx) => {
                self.meta.remove(idx);
                true
            },
            None => false,
        }
    }

    /// The routing key into the client pool: the segment of the command
    /// before the first `.`, or `default` when the command has no dot.
    pub fn service_name(&self) -> &str {
        match self.command.split_once('.') {
            Some((service, _)) => service,
            None => "default",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_add_get_del() {
        let mut header = Header::default();
        header.add_string_meta("zone", "z1");

        assert_eq!(header.get_string_meta("zone"), Some("z1"));
        assert!(header.del_meta("zone"));
        assert_eq!(header.get_meta("zone"), None);
        assert!(!header.del_meta("zone"));
    }

    #[test]
    fn meta_preserves_insertion_order() {
        let mut header = Header::default();
        header.add_string_meta("a", "1");
        header.add_string_meta("b", "2");
        header.add_string_meta("c", "3");

        assert!(header.del_meta("b"));

        let keys: Vec<_> = header.meta.iter().map(|entry| entry.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn del_meta_removes_first_duplicate_only() {
        let mut header = Header::default();
        header.add_string_meta("k", "first");
        header.add_string_meta("k", "second");

        assert!(header.del_meta("k"));
        assert_eq!(header.get_string_meta("k"), Some("second"));
    }

    #[test]
    fn service_name_splits_on_first_dot() {
        let header = Header { command: "chat.user.talk".into(), ..Default::default() };
        assert_eq!(header.service_name(), "chat");

        let bare = Header { command: "ping".into(), ..Default::default() };
        assert_eq!(bare.service_name(), "default");
    }
}
