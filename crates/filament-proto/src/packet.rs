//! Magic-dispatched application packets.
//!
//! Every application packet starts with a four-byte magic tag:
//! [`crate::MAGIC_LOGIC_PKT`] for routed command packets,
//! [`crate::MAGIC_BASIC_PKT`] for the application-level heartbeat. Unknown
//! magic is a fatal decode error on that connection.

use bytes::{Buf, BufMut, Bytes};
use serde::{de::DeserializeOwned, Serialize};

use crate::{endian, Header, ProtocolError, Result, Status, MAGIC_BASIC_PKT, MAGIC_LOGIC_PKT};

/// Heartbeat probe code on a [`BasicPkt`].
pub const CODE_PING: u16 = 1;
/// Heartbeat reply code on a [`BasicPkt`].
pub const CODE_PONG: u16 = 2;

/// The minimal packet: a code and a short opaque body.
///
/// Only used for the application-layer Ping/Pong exchanged between client
/// SDKs and the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicPkt {
    /// Packet code, [`CODE_PING`] or [`CODE_PONG`].
    pub code: u16,
    /// Opaque body; its u16 length bounds it on the wire.
    pub body: Bytes,
}

impl BasicPkt {
    /// A bodyless packet with the given code.
    pub fn new(code: u16) -> Self {
        Self { code, body: Bytes::new() }
    }

    fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let len = u16::try_from(self.body.len())
            .map_err(|_| ProtocolError::LengthOverflow { len: self.body.len(), width: 16 })?;

        dst.put_u16(self.code);
        dst.put_u16(len);
        dst.put_slice(&self.body);

        Ok(())
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        let code = endian::get_u16(buf)?;
        let len = endian::get_u16(buf)? as usize;
        let body = endian::get_fixed(buf, len)?;

        Ok(Self { code, body })
    }
}

/// A routed command packet: a [`Header`] plus an opaque body whose schema
/// is determined by `header.command`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogicPkt {
    /// Routing header.
    pub header: Header,
    /// Opaque CBOR body; the fabric never interprets it.
    pub body: Bytes,
}

impl LogicPkt {
    /// A packet for `command` with a fresh process sequence number.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            header: Header {
                command: command.into(),
                sequence: crate::SEQ.next(),
                ..Header::default()
            },
            body: Bytes::new(),
        }
    }

    /// A reply skeleton: copies command, sequence, channel id, status and
    /// dest from `header`; meta is not carried over.
    pub fn from_header(header: &Header) -> Self {
        Self {
            header: Header {
                command: header.command.clone(),
                channel_id: header.channel_id.clone(),
                sequence: header.sequence,
                status: header.status,
                dest: header.dest.clone(),
                meta: Vec::new(),
            },
            body: Bytes::new(),
        }
    }

    /// Set the status.
    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.header.status = status;
        self
    }

    /// Set the originating channel id.
    #[must_use]
    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.header.channel_id = channel_id.into();
        self
    }

    /// Set the destination account or group.
    #[must_use]
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.header.dest = dest.into();
        self
    }

    /// Serialize `val` as CBOR into the body.
    pub fn write_body<T: Serialize>(mut self, val: &T) -> Result<Self> {
        let mut body = Vec::new();
        ciborium::into_writer(val, &mut body)
            .map_err(|e| ProtocolError::BodyEncode(e.to_string()))?;

        self.body = Bytes::from(body);

        Ok(self)
    }

    /// Deserialize the body into the record the command expects.
    pub fn read_body<T: DeserializeOwned>(&self) -> Result<T> {
        ciborium::from_reader(&self.body[..]).map_err(|e| ProtocolError::BodyDecode(e.to_string()))
    }

    /// See [`Header::service_name`].
    pub fn service_name(&self) -> &str {
        self.header.service_name()
    }

    fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut header_bytes = Vec::new();
        ciborium::into_writer(&self.header, &mut header_bytes)
            .map_err(|e| ProtocolError::HeaderEncode(e.to_string()))?;

        endian::put_bytes(dst, &header_bytes)?;
        endian::put_bytes(dst, &self.body)?;

        Ok(())
    }

    fn decode(buf: &mut impl Buf) -> Result<Self> {
        let header_bytes = endian::get_bytes(buf)?;
        let header: Header = ciborium::from_reader(&header_bytes[..])
            .map_err(|e| ProtocolError::HeaderDecode(e.to_string()))?;

        let body = endian::get_bytes(buf)?;

        Ok(Self { header, body })
    }
}

/// Either packet kind, as read off the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Application heartbeat.
    Basic(BasicPkt),
    /// Routed command.
    Logic(LogicPkt),
}

impl Packet {
    /// Consume four magic bytes and dispatch to the matching decoder.
    pub fn read(buf: &mut impl Buf) -> Result<Self> {
        let magic: [u8; 4] = endian::get_fixed(buf, 4)?[..]
            .try_into()
            .map_err(|_| ProtocolError::Empty)?;

        match magic {
            MAGIC_BASIC_PKT => Ok(Self::Basic(BasicPkt::decode(buf)?)),
            MAGIC_LOGIC_PKT => Ok(Self::Logic(LogicPkt::decode(buf)?)),
            other => Err(ProtocolError::BadMagic(other)),
        }
    }

    /// Read a packet that must be a [`LogicPkt`].
    pub fn read_logic(buf: &mut impl Buf) -> Result<LogicPkt> {
        match Self::read(buf)? {
            Self::Logic(pkt) => Ok(pkt),
            Self::Basic(_) => Err(ProtocolError::WrongPacket { expected: "logic" }),
        }
    }

    /// Read a packet that must be a [`BasicPkt`].
    pub fn read_basic(buf: &mut impl Buf) -> Result<BasicPkt> {
        match Self::read(buf)? {
            Self::Basic(pkt) => Ok(pkt),
            Self::Logic(_) => Err(ProtocolError::WrongPacket { expected: "basic" }),
        }
    }

    /// Prepend the correct magic and encode.
    pub fn marshal(&self) -> Result<Bytes> {
        let mut wire = Vec::new();

        match self {
            Self::Basic(pkt) => {
                wire.put_slice(&MAGIC_BASIC_PKT);
                pkt.encode(&mut wire)?;
            },
            Self::Logic(pkt) => {
                wire.put_slice(&MAGIC_LOGIC_PKT);
                pkt.encode(&mut wire)?;
            },
        }

        Ok(Bytes::from(wire))
    }
}

impl From<BasicPkt> for Packet {
    fn from(pkt: BasicPkt) -> Self {
        Self::Basic(pkt)
    }
}

impl From<LogicPkt> for Packet {
    fn from(pkt: LogicPkt) -> Self {
        Self::Logic(pkt)
    }
}

/// Marshal a logic packet. Convenience for the dominant send path.
pub fn marshal_logic(pkt: &LogicPkt) -> Result<Bytes> {
    Packet::Logic(pkt.clone()).marshal()
}

/// Marshal a basic packet.
pub fn marshal_basic(pkt: &BasicPkt) -> Result<Bytes> {
    Packet::Basic(pkt.clone()).marshal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_round_trip() {
        let pkt = BasicPkt { code: CODE_PING, body: Bytes::from_static(b"hi") };

        let wire = Packet::Basic(pkt.clone()).marshal().unwrap();
        assert_eq!(&wire[..4], MAGIC_BASIC_PKT);

        let parsed = Packet::read_basic(&mut &wire[..]).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn logic_round_trip() {
        let mut pkt = LogicPkt::new("chat.user.talk").with_dest("u2");
        pkt.header.add_string_meta("app", "demo");

        let wire = Packet::Logic(pkt.clone()).marshal().unwrap();
        assert_eq!(&wire[..4], MAGIC_LOGIC_PKT);

        let parsed = Packet::read_logic(&mut &wire[..]).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn bad_magic_is_fatal() {
        let wire = [0u8, 1, 2, 3, 4, 5];
        let err = Packet::read(&mut &wire[..]).unwrap_err();

        assert_eq!(err, ProtocolError::BadMagic([0, 1, 2, 3]));
    }

    #[test]
    fn wrong_variant_is_rejected() {
        let wire = Packet::Basic(BasicPkt::new(CODE_PONG)).marshal().unwrap();
        let err = Packet::read_logic(&mut &wire[..]).unwrap_err();

        assert_eq!(err, ProtocolError::WrongPacket { expected: "logic" });
    }

    #[test]
    fn from_header_drops_meta() {
        let mut pkt = LogicPkt::new("login.signin");
        pkt.header.add_string_meta("dest.server", "g1");

        let reply = LogicPkt::from_header(&pkt.header);
        assert_eq!(reply.header.command, "login.signin");
        assert_eq!(reply.header.sequence, pkt.header.sequence);
        assert!(reply.header.meta.is_empty());
    }

    #[test]
    fn body_record_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Probe {
            token: String,
        }

        let pkt = LogicPkt::new("login.signin")
            .write_body(&Probe { token: "t".into() })
            .unwrap();

        let parsed: Probe = pkt.read_body().unwrap();
        assert_eq!(parsed, Probe { token: "t".into() });
    }
}
