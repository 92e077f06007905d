//! WebSocket transport for the market-data service
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::SessionError;

/// Bidirectional text channel to the remote service
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    /// Next text payload; control frames are handled internally
    async fn recv_text(&mut self) -> Result<String, SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Opens transports; the seam between the connector and the network
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Box<dyn Transport>, SessionError>;
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SessionError::WebSocket(format!("Send failed: {}", e)))
    }

    async fn recv_text(&mut self) -> Result<String, SessionError> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(Message::Text(text)) => return Ok(text),
                Ok(Message::Binary(data)) => {
                    return String::from_utf8(data)
                        .map_err(|e| SessionError::WebSocket(format!("Non-UTF8 frame: {}", e)));
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Pong replies are queued by tungstenite itself
                    debug!("Control frame received");
                }
                Ok(Message::Close(frame)) => {
                    warn!("WebSocket closed by server: {:?}", frame);
                    return Err(SessionError::Closed);
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Err(SessionError::WebSocket(e.to_string())),
            }
        }

        Err(SessionError::Closed)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| SessionError::WebSocket(format!("Close failed: {}", e)))
    }
}

/// Dials real WebSocket connections, bounded by a connect timeout
pub struct WsDialer {
    connect_timeout: Duration,
}

impl WsDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        WsDialer { connect_timeout }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self, url: &str) -> Result<Box<dyn Transport>, SessionError> {
        info!("🔌 Connecting to {}", redact_query(url));

        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| SessionError::Timeout(self.connect_timeout))?
            .map_err(|e| SessionError::WebSocket(format!("Connection failed: {}", e)))?;

        Ok(Box::new(WsTransport { stream }))
    }
}

/// Strip the query string so app ids and similar never reach the logs
fn redact_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
