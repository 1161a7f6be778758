//! Length-prefixed primitives in network byte order.
//!
//! All multi-byte integers on the wire are big-endian. Two prefix widths
//! exist: `bytes` values carry a u32 prefix, `short` values a u16 prefix.
//! Every getter checks `remaining()` first, so a truncated buffer yields
//! [`ProtocolError::BufferUnderflow`] instead of a panic.

use bytes::{Buf, BufMut, Bytes};

use crate::{ProtocolError, Result};

fn ensure(buf: &impl Buf, need: usize) -> Result<()> {
    if buf.remaining() < need {
        return Err(ProtocolError::BufferUnderflow { need: need - buf.remaining(), remaining: buf.remaining() });
    }

    Ok(())
}

/// Read one byte.
pub fn get_u8(buf: &mut impl Buf) -> Result<u8> {
    ensure(buf, 1)?;

    Ok(buf.get_u8())
}

/// Read a big-endian u16.
pub fn get_u16(buf: &mut impl Buf) -> Result<u16> {
    ensure(buf, 2)?;

    Ok(buf.get_u16())
}

/// Read a big-endian u32.
pub fn get_u32(buf: &mut impl Buf) -> Result<u32> {
    ensure(buf, 4)?;

    Ok(buf.get_u32())
}

/// Read exactly `len` bytes.
pub fn get_fixed(buf: &mut impl Buf, len: usize) -> Result<Bytes> {
    ensure(buf, len)?;

    Ok(buf.copy_to_bytes(len))
}

/// Read a u32-length-prefixed byte string.
pub fn get_bytes(buf: &mut impl Buf) -> Result<Bytes> {
    let len = get_u32(buf)? as usize;

    get_fixed(buf, len)
}

/// Read a u16-length-prefixed byte string.
pub fn get_short_bytes(buf: &mut impl Buf) -> Result<Bytes> {
    let len = get_u16(buf)? as usize;

    get_fixed(buf, len)
}

/// Read a u16-length-prefixed UTF-8 string. Invalid UTF-8 is replaced.
pub fn get_short_string(buf: &mut impl Buf) -> Result<String> {
    let raw = get_short_bytes(buf)?;

    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Write a u32-length-prefixed byte string.
pub fn put_bytes(buf: &mut impl BufMut, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len())
        .map_err(|_| ProtocolError::LengthOverflow { len: data.len(), width: 32 })?;

    buf.put_u32(len);
    buf.put_slice(data);

    Ok(())
}

/// Write a u16-length-prefixed byte string.
pub fn put_short_bytes(buf: &mut impl BufMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| ProtocolError::LengthOverflow { len: data.len(), width: 16 })?;

    buf.put_u16(len);
    buf.put_slice(data);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_integers() {
        let mut wire = Vec::new();
        wire.put_u8(0x7f);
        wire.put_u16(0xbeef);
        wire.put_u32(0xdead_beef);

        let mut buf = &wire[..];
        assert_eq!(get_u8(&mut buf).unwrap(), 0x7f);
        assert_eq!(get_u16(&mut buf).unwrap(), 0xbeef);
        assert_eq!(get_u32(&mut buf).unwrap(), 0xdead_beef);
        assert!(buf.is_empty());
    }

    #[test]
    fn round_trip_prefixed_bytes() {
        let mut wire = Vec::new();
        put_bytes(&mut wire, b"hello").unwrap();
        put_short_bytes(&mut wire, b"world").unwrap();

        let mut buf = &wire[..];
        assert_eq!(&get_bytes(&mut buf).unwrap()[..], b"hello");
        assert_eq!(get_short_string(&mut buf).unwrap(), "world");
    }

    #[test]
    fn big_endian_on_the_wire() {
        let mut wire = Vec::new();
        put_bytes(&mut wire, b"ab").unwrap();

        assert_eq!(wire, vec![0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn underflow_is_an_error() {
        let mut buf = &[0u8, 0, 0, 9, b'x'][..];
        let err = get_bytes(&mut buf).unwrap_err();

        assert!(matches!(err, ProtocolError::BufferUnderflow { .. }));
    }

    #[test]
    fn short_prefix_overflow_is_an_error() {
        let data = vec![0u8; 70_000];
        let mut wire = Vec::new();
        let err = put_short_bytes(&mut wire, &data).unwrap_err();

        assert_eq!(err, ProtocolError::LengthOverflow { len: 70_000, width: 16 });
    }
}
