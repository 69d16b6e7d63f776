//! Transport seam between the channel driver and a real socket.
//!
//! DESIGN
//! ======
//! The driver never touches a websocket directly. It asks a [`Connector`]
//! for a [`Transport`], then hands that transport to a per-connection pump
//! task. Tests substitute an in-memory connector; production uses
//! [`WsConnector`] over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The URL could not be used to construct a connection at all.
    #[error("invalid channel URL: {0}")]
    InvalidUrl(String),
    /// The handshake failed (refused, DNS, TLS, HTTP upgrade).
    #[error("websocket connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    /// The open socket failed while sending or receiving.
    #[error("websocket transport failed: {0}")]
    Protocol(Box<tungstenite::Error>),
    #[error("transport io failed: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Construction failures never reach the network, so retrying is pointless.
    #[must_use]
    pub fn is_construction(&self) -> bool {
        matches!(self, Self::InvalidUrl(_))
    }
}

/// Opens transports to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

/// One open, text-framed, bidirectional connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound text frame. `None` once the peer has closed.
    ///
    /// Must be cancel safe: the pump polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection; errors are irrelevant at this point.
    async fn close(&mut self);
}

// =============================================================================
// TUNGSTENITE
// =============================================================================

/// Production connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, _) = connect_async(url).await.map_err(|e| match e {
            tungstenite::Error::Url(url_err) => TransportError::InvalidUrl(url_err.to_string()),
            other => TransportError::Connect(Box::new(other)),
        })?;
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Protocol(Box::new(e)))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::Protocol(Box::new(e)))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                // Some servers send JSON as binary; the codec decides validity.
                Message::Binary(bytes) => return Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Message::Close(_) => return None,
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
