//! WebSocket transport.
//!
//! Frames map one to one onto native WebSocket frames, so this transport
//! has no length-prefix codec of its own and `flush` is a no-op (every
//! send drains the sink).

use std::net::SocketAddr;

use async_trait::async_trait;
use filament_proto::{Frame, OpCode};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_tungstenite::{
    accept_async, connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::{
    conn::{Conn, FrameReader, FrameWriter, Upgrader},
    Error, Result,
};

fn to_message(opcode: OpCode, payload: &[u8]) -> Option<Message> {
    match opcode {
        OpCode::Binary => Some(Message::Binary(payload.to_vec())),
        OpCode::Text => Some(Message::Text(String::from_utf8_lossy(payload).into_owned())),
        OpCode::Ping => Some(Message::Ping(payload.to_vec())),
        OpCode::Pong => Some(Message::Pong(payload.to_vec())),
        OpCode::Close => Some(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: String::from_utf8_lossy(payload).into_owned().into(),
        }))),
        OpCode::Continuation => None,
    }
}

fn to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(payload) => Some(Frame::new(OpCode::Binary, payload)),
        Message::Text(text) => Some(Frame::new(OpCode::Text, text.into_bytes())),
        Message::Ping(payload) => Some(Frame::new(OpCode::Ping, payload)),
        Message::Pong(payload) => Some(Frame::new(OpCode::Pong, payload)),
        Message::Close(close) => {
            let reason = close
                .map(|c| c.reason.into_owned().into_bytes())
                .unwrap_or_default();

            Some(Frame::new(OpCode::Close, reason))
        },
        // Raw continuation frames are reassembled by tungstenite before we
        // ever see them.
        Message::Frame(_) => None,
    }
}

/// A framed connection over an upgraded WebSocket stream.
pub struct WsConn<S> {
    inner: WebSocketStream<S>,
    remote: Option<SocketAddr>,
}

impl<S> WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an upgraded stream.
    pub fn new(inner: WebSocketStream<S>, remote: Option<SocketAddr>) -> Self {
        Self { inner, remote }
    }
}

/// Dial a `ws://` URL and complete the client handshake.
pub async fn connect(url: &str) -> Result<WsConn<MaybeTlsStream<TcpStream>>> {
    let (stream, _) = connect_async(url).await?;

    Ok(WsConn { inner: stream, remote: None })
}

#[async_trait]
impl<S> Conn for WsConn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let message = self.inner.next().await.ok_or(Error::RemoteClosed)??;

            if let Some(frame) = to_frame(message) {
                return Ok(frame);
            }
        }
    }

    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let Some(message) = to_message(opcode, payload) else {
            debug!("dropping continuation frame on websocket transport");
            return Ok(());
        };

        self.inner.send(message).await?;

        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        // send() drains the sink per message.
        Ok(())
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let (sink, stream) = self.inner.split();

        (Box::new(WsFrameReader(stream)), Box::new(WsFrameWriter(sink)))
    }
}

struct WsFrameReader<S>(SplitStream<WebSocketStream<S>>);

#[async_trait]
impl<S> FrameReader for WsFrameReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let message = self.0.next().await.ok_or(Error::RemoteClosed)??;

            if let Some(frame) = to_frame(message) {
                return Ok(frame);
            }
        }
    }
}

struct WsFrameWriter<S>(SplitSink<WebSocketStream<S>, Message>);

#[async_trait]
impl<S> FrameWriter for WsFrameWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let Some(message) = to_message(opcode, payload) else {
            debug!("dropping continuation frame on websocket transport");
            return Ok(());
        };

        self.0.send(message).await?;

        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Server-side WebSocket handshake.
pub struct WsUpgrader;

#[async_trait]
impl Upgrader for WsUpgrader {
    fn name(&self) -> &'static str {
        "websocket.server"
    }

    async fn upgrade(&self, stream: TcpStream) -> Result<Box<dyn Conn>> {
        let remote = stream.peer_addr().ok();
        let upgraded = accept_async(stream).await?;

        Ok(Box::new(WsConn::new(upgraded, remote)))
    }
}
