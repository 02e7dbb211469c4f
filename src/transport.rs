//! Message transport seam.
//!
//! A session only needs two operations from its connection: wait for the
//! next inbound message and write one outbound binary message. Message
//! framing belongs to the transport; the session only sees payloads.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connection faults. Always terminal for the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("receive failed: {0}")]
    Recv(#[source] BoxError),
    #[error("send failed: {0}")]
    Send(#[source] BoxError),
}

/// A bidirectional message connection.
#[async_trait]
pub trait FrameTransport: Send {
    /// Wait for the next inbound payload. `Ok(None)` means the peer closed.
    ///
    /// Must be cancel safe: sessions race it against timers.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Write one frame as a single binary message.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;
}

#[async_trait]
impl FrameTransport for WebSocket {
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match WebSocket::recv(self).await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::copy_from_slice(text.as_str().as_bytes())))
                }
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                // Pings are answered by the protocol layer
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Recv(Box::new(e))),
            }
        }
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        WebSocket::send(self, Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Send(Box::new(e)))
    }
}
