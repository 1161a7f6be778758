//! Inter-service dialer.

use async_trait::async_trait;
use filament_core::{
    tcp::TcpConn, Conn, Dialer, DialerContext, Error, Result,
};
use filament_proto::{payloads, payloads::InnerHandshake, OpCode};
use tracing::debug;

/// Dials a logic service over raw framed TCP and announces this process's
/// service id in the first frame. The accepting side uses that id as the
/// channel id, so replies flow back over the same link.
pub struct TcpDialer {
    service_id: String,
}

impl TcpDialer {
    /// A dialer announcing `service_id`.
    pub fn new(service_id: impl Into<String>) -> Self {
        Self { service_id: service_id.into() }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial_and_handshake(&self, ctx: DialerContext) -> Result<Box<dyn Conn>> {
        debug!(peer = %ctx.address, id = %self.service_id, "dial and handshake");

        let mut conn = TcpConn::connect(&ctx.address).await?;

        // First frame on the link: announce who is dialing. The peer's
        // acceptor turns this into the channel id.
        let hello = payloads::encode(&InnerHandshake { service_id: self.service_id.clone() })
            .map_err(|e| Error::Handshake(e.to_string()))?;

        conn.write_frame(OpCode::Binary, &hello).await?;
        conn.flush().await?;

        Ok(Box::new(conn))
    }
}
