//! Raw framed TCP transport.
//!
//! Wire layout per frame: `u8 opcode | u32 big-endian length | payload`.
//! Reads go through a 4 KiB buffered reader, writes through a 1 KiB
//! buffered writer; [`FrameWriter::flush`] drains the writer.

use std::net::SocketAddr;

use async_trait::async_trait;
use filament_proto::{Frame, OpCode, ProtocolError};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};

use crate::{
    conn::{Conn, FrameReader, FrameWriter, Upgrader},
    Result,
};

const READ_BUFFER_SIZE: usize = 4 * 1024;
const WRITE_BUFFER_SIZE: usize = 1024;

async fn read_frame_from<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin + Send,
{
    let raw = reader.read_u8().await?;
    let opcode = OpCode::from_u8(raw).ok_or(ProtocolError::UnknownOpCode(raw))?;

    let len = reader.read_u32().await? as usize;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Frame::new(opcode, payload))
}

async fn write_frame_to<W>(writer: &mut W, opcode: OpCode, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::LengthOverflow { len: payload.len(), width: 32 })?;

    writer.write_u8(opcode as u8).await?;
    writer.write_u32(len).await?;
    writer.write_all(payload).await?;

    Ok(())
}

/// A framed connection over a TCP stream.
pub struct TcpConn {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    remote: Option<SocketAddr>,
}

impl TcpConn {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream) -> Self {
        let remote = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();

        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, read_half),
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, write_half),
            remote,
        }
    }

    /// Dial `addr` and wrap the resulting stream.
    pub async fn connect(addr: &str) -> Result<Self> {
        Ok(Self::new(TcpStream::connect(addr).await?))
    }
}

#[async_trait]
impl Conn for TcpConn {
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        read_frame_from(&mut self.reader).await
    }

    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        write_frame_to(&mut self.writer, opcode, payload).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;

        Ok(())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (Box::new(TcpFrameReader(self.reader)), Box::new(TcpFrameWriter(self.writer)))
    }
}

struct TcpFrameReader(BufReader<OwnedReadHalf>);

#[async_trait]
impl FrameReader for TcpFrameReader {
    async fn read_frame(&mut self) -> Result<Frame> {
        read_frame_from(&mut self.0).await
    }
}

struct TcpFrameWriter(BufWriter<OwnedWriteHalf>);

#[async_trait]
impl FrameWriter for TcpFrameWriter {
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        write_frame_to(&mut self.0, opcode, payload).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.0.flush().await?;

        Ok(())
    }
}

/// No-op handshake: a raw TCP stream is already a framed connection.
pub struct TcpUpgrader;

#[async_trait]
impl Upgrader for TcpUpgrader {
    fn name(&self) -> &'static str {
        "tcp.server"
    }

    async fn upgrade(&self, stream: TcpStream) -> Result<Box<dyn Conn>> {
        Ok(Box::new(TcpConn::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn frame_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = TcpConn::new(stream);

            let frame = conn.read_frame().await.unwrap();
            conn.write_frame(frame.opcode, &frame.payload).await.unwrap();
            conn.flush().await.unwrap();
        });

        let mut conn = TcpConn::connect(&addr.to_string()).await.unwrap();
        conn.write_frame(OpCode::Binary, b"ping me back").await.unwrap();
        conn.flush().await.unwrap();

        let echoed = conn.read_frame().await.unwrap();
        assert_eq!(echoed.opcode, OpCode::Binary);
        assert_eq!(&echoed.payload[..], b"ping me back");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn split_halves_keep_working() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let conn: Box<dyn Conn> = Box::new(TcpConn::new(stream));
            let (mut reader, mut writer) = conn.split();

            let frame = reader.read_frame().await.unwrap();
            writer.write_frame(OpCode::Pong, &frame.payload).await.unwrap();
            writer.flush().await.unwrap();
        });

        let mut conn = TcpConn::connect(&addr.to_string()).await.unwrap();
        conn.write_frame(OpCode::Ping, b"hb").await.unwrap();
        conn.flush().await.unwrap();

        let reply = conn.read_frame().await.unwrap();
        assert_eq!(reply.opcode, OpCode::Pong);

        server.await.unwrap();
    }
}
