//! In-memory transports and collaborators for tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use super::transport::{Connector, Frame, Transport};
use super::CLOSE_NORMAL;
use crate::auth::{AuthUser, Credentials, IdentityProvider, Session};
use crate::config::ConnectionConfig;
use crate::error::{PresenceError, Result};

enum Inbound {
    Text(String),
    Close(u16),
    /// Close frame with the stream left open afterwards
    CloseHold(u16),
    Drop,
    Error(String),
}

pub(crate) struct FakeTransport {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    loopback: mpsc::UnboundedSender<Inbound>,
    outbound: mpsc::UnboundedSender<String>,
    closed_by_client: Arc<AtomicBool>,
    finished: bool,
}

/// Server side of a [`FakeTransport`]
pub(crate) struct FakePeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    closed_by_client: Arc<AtomicBool>,
    ended: AtomicBool,
}

impl FakeTransport {
    pub(crate) fn pair() -> (FakeTransport, FakePeer) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = FakeTransport {
            inbound: inbound_rx,
            loopback: inbound_tx.clone(),
            outbound: outbound_tx,
            closed_by_client: closed.clone(),
            finished: false,
        };
        let peer = FakePeer {
            inbound: inbound_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
            closed_by_client: closed,
            ended: AtomicBool::new(false),
        };
        (transport, peer)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        if self.finished {
            return None;
        }
        match self.inbound.recv().await? {
            Inbound::Text(text) => Some(Ok(Frame::Text(text))),
            Inbound::Close(code) => {
                self.finished = true;
                Some(Ok(Frame::Close {
                    code,
                    reason: String::new(),
                }))
            }
            Inbound::CloseHold(code) => Some(Ok(Frame::Close {
                code,
                reason: String::new(),
            })),
            Inbound::Drop => {
                self.finished = true;
                None
            }
            Inbound::Error(msg) => Some(Err(PresenceError::Socket(msg))),
        }
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        self.outbound
            .send(text)
            .map_err(|_| PresenceError::SocketClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed_by_client.store(true, Ordering::SeqCst);
        // The server echoes the close frame.
        let _ = self.loopback.send(Inbound::Close(CLOSE_NORMAL));
        Ok(())
    }
}

impl FakePeer {
    pub(crate) fn send_text(&self, text: &str) {
        let _ = self.inbound.send(Inbound::Text(text.to_string()));
    }

    /// Server-initiated clean close
    pub(crate) fn close(&self, code: u16) {
        self.ended.store(true, Ordering::SeqCst);
        let _ = self.inbound.send(Inbound::Close(code));
    }

    /// Server close frame that never finishes the closing handshake
    pub(crate) fn close_and_hold(&self, code: u16) {
        self.ended.store(true, Ordering::SeqCst);
        let _ = self.inbound.send(Inbound::CloseHold(code));
    }

    /// Connection lost without a close frame
    pub(crate) fn drop_connection(&self) {
        self.ended.store(true, Ordering::SeqCst);
        let _ = self.inbound.send(Inbound::Drop);
    }

    pub(crate) fn fail(&self, msg: &str) {
        let _ = self.inbound.send(Inbound::Error(msg.to_string()));
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed_by_client.load(Ordering::SeqCst)
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.is_closed() && !self.ended.load(Ordering::SeqCst)
    }

    pub(crate) async fn next_outbound(&self) -> Option<String> {
        self.outbound.lock().await.recv().await
    }
}

/// Connector handing out [`FakeTransport`]s
#[derive(Default)]
pub(crate) struct FakeConnector {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    urls: Mutex<Vec<Url>>,
    live_at_connect: Mutex<Vec<usize>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    delay: Mutex<Duration>,
    close_on_open: Mutex<Option<u16>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Peers send a close frame right after the handshake
    pub(crate) fn set_close_on_open(&self, code: Option<u16>) {
        *self.close_on_open.lock() = code;
    }

    pub(crate) fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock()[index].clone()
    }

    pub(crate) fn last_peer(&self) -> Arc<FakePeer> {
        self.peers
            .lock()
            .last()
            .cloned()
            .expect("no connection opened yet")
    }

    pub(crate) fn urls(&self) -> Vec<Url> {
        self.urls.lock().clone()
    }

    /// Number of live peers observed at each connect call
    pub(crate) fn live_at_connect(&self) -> Vec<usize> {
        self.live_at_connect.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.clone());
        let live = self.peers.lock().iter().filter(|p| p.is_live()).count();
        self.live_at_connect.lock().push(live);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(PresenceError::Socket("connection refused".into()));
        }

        let (transport, peer) = FakeTransport::pair();
        if let Some(code) = *self.close_on_open.lock() {
            peer.close(code);
        }
        self.peers.lock().push(Arc::new(peer));
        Ok(Box::new(transport))
    }
}

/// Identity provider minting numbered tokens
#[derive(Default)]
pub(crate) struct FakeIdentity {
    fetches: AtomicUsize,
    failing: AtomicBool,
    signed_out: AtomicBool,
}

impl FakeIdentity {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn fetch_current_session(&self) -> Result<Session> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.load(Ordering::SeqCst) {
            return Err(PresenceError::Authentication("session expired".into()));
        }
        if self.signed_out.load(Ordering::SeqCst) {
            return Ok(Session::default());
        }
        Ok(Session::with_id_token(format!("token-{}", n)))
    }

    async fn current_user(&self) -> Result<Option<AuthUser>> {
        Ok(Some(AuthUser {
            username: "expert".to_string(),
        }))
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<AuthUser> {
        self.signed_out.store(false, Ordering::SeqCst);
        Ok(AuthUser {
            username: credentials.username,
        })
    }

    async fn sign_out(&self) -> Result<()> {
        self.signed_out.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        endpoint: Url::parse("ws://presence.test/ws").unwrap(),
        retry_delay: Duration::from_millis(3000),
        max_retries: 0,
        connect_timeout: Duration::from_secs(10),
        close_timeout: Duration::from_secs(1),
    }
}
