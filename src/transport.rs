//! Transport seam between the protocol engine and the wire.
//!
//! The engine owns exactly one [`Transport`] at a time and replaces it
//! wholesale on reconnect. A [`Connector`] produces transports from
//! the endpoint URL; the production implementation is a WebSocket
//! ([`WsConnector`]), and tests substitute a channel-backed mock.

use crate::error::{Result, ZephyrLinkError};
use crate::event_handlers::DisconnectReason;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// One event delivered by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A text frame (one batch) from the server.
    Message(String),
    /// The peer closed the connection.
    Closed(DisconnectReason),
    /// Transport failure; the connection is unusable afterwards.
    Error(String),
}

/// A live bidirectional connection carrying batch frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one batch frame.
    async fn send(&mut self, frame: &str) -> Result<()>;

    /// Wait for the next event. Cancel-safe at frame granularity.
    async fn next_event(&mut self) -> TransportEvent;

    /// Close the connection. Best effort; errors are discarded.
    async fn close(&mut self);
}

/// Factory producing a fresh [`Transport`] per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new transport to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// Production connector dialing `{ws|wss}://{project_id}.{host}:{port}`.
#[derive(Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        log::debug!("establishing WebSocket connection to {url}");
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| ZephyrLinkError::TransportError(format!("connection failed: {e}")))?;
        Ok(Box::new(WsTransport { inner: stream }))
    }
}

/// WebSocket-backed transport over tokio-tungstenite.
pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &str) -> Result<()> {
        self.inner
            .send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(|e| ZephyrLinkError::TransportError(format!("send failed: {e}")))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return TransportEvent::Message(text.as_str().to_owned())
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return TransportEvent::Message(text),
                    Err(_) => log::warn!("discarding non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = self.inner.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    return TransportEvent::Closed(match frame {
                        Some(f) => DisconnectReason::with_code(f.reason.to_string(), f.code.into()),
                        None => DisconnectReason::new("server closed connection"),
                    })
                }
                Some(Err(e)) => return TransportEvent::Error(e.to_string()),
                None => return TransportEvent::Closed(DisconnectReason::new("transport stream ended")),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}
