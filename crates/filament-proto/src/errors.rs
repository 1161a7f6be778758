//! Codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding wire data.
///
/// A decode error on a connection is fatal for that connection; the read
/// loop tears it down. Encode errors only occur when a value exceeds its
/// length prefix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before the value it claims to contain.
    #[error("buffer underflow: need {need} more bytes, {remaining} remaining")]
    BufferUnderflow {
        /// Bytes the decoder still needed.
        need: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// The four magic bytes match neither packet kind.
    #[error("magic code {0:02x?} is incorrect")]
    BadMagic([u8; 4]),

    /// A length-prefixed value does not fit its prefix width.
    #[error("value of {len} bytes exceeds a {width}-bit length prefix")]
    LengthOverflow {
        /// Actual value length.
        len: usize,
        /// Width of the length prefix in bits.
        width: u8,
    },

    /// The header record failed to deserialize.
    #[error("header decode: {0}")]
    HeaderDecode(String),

    /// The header record failed to serialize.
    #[error("header encode: {0}")]
    HeaderEncode(String),

    /// A packet body failed to deserialize into the requested record.
    #[error("body decode: {0}")]
    BodyDecode(String),

    /// A body record failed to serialize.
    #[error("body encode: {0}")]
    BodyEncode(String),

    /// Read a packet of one kind where the other was required.
    #[error("packet is not a {expected} packet")]
    WrongPacket {
        /// The kind the caller required.
        expected: &'static str,
    },

    /// The opcode byte is not a known frame opcode.
    #[error("unknown frame opcode {0:#04x}")]
    UnknownOpCode(u8),

    /// An empty buffer where a value is mandatory.
    #[error("data is empty")]
    Empty,
}
