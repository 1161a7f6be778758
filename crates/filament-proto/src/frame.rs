//! The transport frame: an opcode plus an opaque payload.
//!
//! Transport-independent. The raw framed transport writes it as
//! `u8 opcode | u32 big-endian length | payload`; the WebSocket transport
//! maps the opcode onto native frames and never uses this codec.

use bytes::{Buf, BufMut, Bytes};

use crate::{endian, ProtocolError, Result};

/// Frame opcode, matching the WebSocket opcode space so the web-upgrade
/// transport can map it one to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation of a fragmented message. Unused by the fabric.
    Continuation = 0x0,
    /// Text payload. Unused by the fabric.
    Text = 0x1,
    /// Binary payload; carries application packets.
    Binary = 0x2,
    /// Graceful close, payload is an optional reason.
    Close = 0x8,
    /// Transport-level heartbeat probe.
    Ping = 0x9,
    /// Heartbeat reply.
    Pong = 0xa,
}

impl OpCode {
    /// Decode an opcode byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xa => Some(Self::Pong),
            _ => None,
        }
    }
}

/// A transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What the payload means to the transport.
    pub opcode: OpCode,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from an opcode and payload.
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self { opcode, payload: payload.into() }
    }

    /// Encode in the raw framed transport layout.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        dst.put_u8(self.opcode as u8);
        endian::put_bytes(dst, &self.payload)?;

        Ok(())
    }

    /// Decode from the raw framed transport layout.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let raw = endian::get_u8(buf)?;
        let opcode = OpCode::from_u8(raw).ok_or(ProtocolError::UnknownOpCode(raw))?;
        let payload = endian::get_bytes(buf)?;

        Ok(Self { opcode, payload })
    }
}
