//! Socket transport seam
//!
//! The manager talks to sockets through [`Connector`] and [`Transport`] so the
//! retry logic can run against in-memory transports in tests.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use super::CLOSE_NORMAL;
use crate::error::Result;

/// Close code used when a close frame carries no status
const CLOSE_NO_STATUS: u16 = 1005;

/// Inbound frame surfaced by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close { code: u16, reason: String },
}

/// An open socket
#[async_trait]
pub trait Transport: Send {
    /// Next inbound frame
    ///
    /// Returns `None` once the stream has ended. A stream that ends without a
    /// preceding [`Frame::Close`] was terminated abnormally.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;

    /// Send a text frame
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Start the closing handshake
    async fn close(&mut self) -> Result<()>;
}

/// Opens sockets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector backed by `tokio-tungstenite`
///
/// `wss://` endpoints use rustls with the webpki root store.
#[derive(Debug, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        // Err means a provider is already installed for this process.
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
        Self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        let (stream, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsTransport { stream }))
    }
}

struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    return Some(Ok(Frame::Close { code, reason }));
                }
                Ok(Message::Binary(data)) => {
                    debug!(len = data.len(), "Ignoring binary frame");
                }
                // Pings are answered by tungstenite on the next read/write.
                Ok(_) => {}
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(CLOSE_NORMAL),
            reason: String::new().into(),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
