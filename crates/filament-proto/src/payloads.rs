//! Body records for the fabric-level commands.
//!
//! Chat and group bodies belong to the business services and are opaque to
//! this crate; only the records the fabric itself produces or consumes
//! live here.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{ProtocolError, Result};

/// Serialize a body record to its wire form.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let mut raw = Vec::new();
    ciborium::into_writer(value, &mut raw)
        .map_err(|e| ProtocolError::BodyEncode(e.to_string()))?;

    Ok(Bytes::from(raw))
}

/// Deserialize a body record from its wire form.
pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    ciborium::from_reader(raw).map_err(|e| ProtocolError::BodyDecode(e.to_string()))
}

/// Body of a `login.signin` request from a client SDK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoginRequest {
    /// Signed bearer token.
    pub token: String,
    /// Free-form client labels.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of a successful `login.signin` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoginResponse {
    /// The channel id assigned by the gateway.
    pub channel_id: String,
}

/// Pushed to a connection that was evicted by a newer login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KickoutNotify {
    /// The channel being evicted.
    pub channel_id: String,
}

/// First frame on an inter-service link: the dialing process announces its
/// service id, which becomes its channel id on the accepting side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InnerHandshake {
    /// Service id of the dialing process.
    pub service_id: String,
}
