//! Compact cluster-wide address of a connected account.

use bytes::Bytes;

use crate::{endian, ProtocolError, Result};

/// Where an account is currently connected: the gateway process and the
/// channel inside it. `gate_id + channel_id` is globally unique.
///
/// Encoded as two u16-length-prefixed byte strings, kept deliberately
/// small: the location directory is the hottest keyspace in the session
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    /// Gateway-scoped channel identity.
    pub channel_id: String,
    /// Gateway service id.
    pub gate_id: String,
}

impl Location {
    /// Encode to the storage representation. Fails when either field
    /// exceeds its u16 length prefix.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(4 + self.channel_id.len() + self.gate_id.len());

        endian::put_short_bytes(&mut buf, self.channel_id.as_bytes())?;
        endian::put_short_bytes(&mut buf, self.gate_id.as_bytes())?;

        Ok(Bytes::from(buf))
    }

    /// Decode from the storage representation. Empty input is an error.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut buf = data;
        let channel_id = endian::get_short_string(&mut buf)?;
        let gate_id = endian::get_short_string(&mut buf)?;

        Ok(Self { channel_id, gate_id })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn location_round_trip(channel_id in ".{0,128}", gate_id in ".{0,64}") {
            let loc = Location { channel_id, gate_id };
            let parsed = Location::from_bytes(&loc.to_bytes().unwrap()).unwrap();

            prop_assert_eq!(loc, parsed);
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(Location::from_bytes(&[]).unwrap_err(), ProtocolError::Empty);
    }

    #[test]
    fn overlong_field_is_an_error() {
        let loc = Location { channel_id: "c".repeat(70_000), gate_id: "g1".into() };

        assert!(matches!(loc.to_bytes(), Err(ProtocolError::LengthOverflow { .. })));
    }
}
