//! Connection manager
//!
//! Keeps at most one live socket. `connect()` is guarded by an in-flight flag,
//! unclean closes schedule exactly one retry after `retry_delay`, and the
//! pending retry is a single cancelable token so a manual `reconnect()` never
//! races an automatic one.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::socket::{open_socket, SocketHandle};
use super::transport::{Connector, WsConnector};
use super::{CloseEvent, ConnectionState};
use crate::auth::IdentityProvider;
use crate::config::ConnectionConfig;
use crate::error::{PresenceError, Result};

/// Result of a `connect()` call
#[derive(Debug)]
pub enum ConnectOutcome {
    /// A new socket was opened and published
    Opened(SocketHandle),
    /// A socket is already open; nothing was done
    AlreadyOpen(SocketHandle),
    /// Another attempt is in flight; nothing was done
    InFlight,
    /// A `disconnect()` or cancelled retry made this attempt obsolete
    Superseded,
    /// The attempt failed (already logged)
    Failed(PresenceError),
}

impl ConnectOutcome {
    pub fn handle(&self) -> Option<&SocketHandle> {
        match self {
            Self::Opened(handle) | Self::AlreadyOpen(handle) => Some(handle),
            Self::InFlight | Self::Superseded | Self::Failed(_) => None,
        }
    }

    pub fn is_opened(&self) -> bool {
        matches!(self, Self::Opened(_))
    }
}

struct PendingRetry {
    seq: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct ManagerState {
    /// In-flight guard
    connecting: bool,
    current: Option<SocketHandle>,
    retry: Option<PendingRetry>,
    retry_seq: u64,
    /// Consecutive automatic retries since the last successful open
    retries: u32,
    /// Bumped by `disconnect()` to discard attempts started before it
    epoch: u64,
}

struct Inner {
    config: ConnectionConfig,
    identity: Arc<dyn IdentityProvider>,
    connector: Arc<dyn Connector>,
    state: Mutex<ManagerState>,
    state_tx: watch::Sender<ConnectionState>,
    handle_tx: watch::Sender<Option<SocketHandle>>,
}

/// Owner of the single real-time connection
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        identity: Arc<dyn IdentityProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (handle_tx, _) = watch::channel(None);

        Self {
            inner: Arc::new(Inner {
                config,
                identity,
                connector,
                state: Mutex::new(ManagerState::default()),
                state_tx,
                handle_tx,
            }),
        }
    }

    /// Manager using real WebSockets
    pub fn with_websocket(config: ConnectionConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::new(config, identity, Arc::new(WsConnector::new()))
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Currently published socket, if any
    pub fn current(&self) -> Option<SocketHandle> {
        self.inner.handle_tx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to handle replacement
    ///
    /// Consumers must re-subscribe to socket events whenever the handle changes.
    pub fn subscribe_handle(&self) -> watch::Receiver<Option<SocketHandle>> {
        self.inner.handle_tx.subscribe()
    }

    pub fn is_connecting(&self) -> bool {
        self.inner.state.lock().connecting
    }

    /// Whether an automatic retry is scheduled
    pub fn retry_pending(&self) -> bool {
        self.inner.state.lock().retry.is_some()
    }

    /// Open a connection unless one is open or in flight
    #[instrument(skip(self))]
    pub async fn connect(&self) -> ConnectOutcome {
        self.inner.connect(None).await
    }

    /// Close the current socket, if any, then connect again
    #[instrument(skip(self))]
    pub async fn reconnect(&self) -> ConnectOutcome {
        info!("Manual reconnection requested");

        let previous = {
            let mut state = self.inner.state.lock();
            state.cancel_retry();
            state.retries = 0;
            let previous = state.current.take();
            if previous.is_some() {
                self.inner.publish(ConnectionState::Disconnected, None);
            }
            previous
        };

        if let Some(handle) = previous {
            handle.close().await;
        }

        self.inner.connect(None).await
    }

    /// Cleanly close the connection without scheduling a retry
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let previous = {
            let mut state = self.inner.state.lock();
            state.epoch += 1;
            state.cancel_retry();
            state.retries = 0;
            self.inner.publish(ConnectionState::Disconnected, None);
            state.current.take()
        };

        if let Some(handle) = previous {
            info!(socket_id = %handle.id(), "Closing presence connection");
            handle.close().await;
        }
    }
}

impl ManagerState {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            debug!("Cancelling scheduled reconnect");
            retry.token.cancel();
        }
    }
}

impl Inner {
    /// Run one connection attempt
    ///
    /// `retry_seq` identifies the scheduled retry driving this attempt; the
    /// attempt is dropped unless that retry is still the pending one.
    async fn connect(self: &Arc<Self>, retry_seq: Option<u64>) -> ConnectOutcome {
        let (epoch, draining) = {
            let mut state = self.state.lock();
            if let Some(seq) = retry_seq {
                match state.retry.take() {
                    Some(retry) if retry.seq == seq && !retry.token.is_cancelled() => {}
                    other => {
                        state.retry = other;
                        debug!(seq, "Scheduled reconnect no longer pending");
                        return ConnectOutcome::Superseded;
                    }
                }
            }
            if state.connecting {
                debug!("Already attempting to connect");
                return ConnectOutcome::InFlight;
            }
            if let Some(handle) = state.current.as_ref().filter(|h| h.is_open()) {
                debug!(socket_id = %handle.id(), "Already connected");
                return ConnectOutcome::AlreadyOpen(handle.clone());
            }
            state.connecting = true;
            state.cancel_retry();
            // A closing socket is detached so its close cannot schedule a retry.
            let draining = state.current.take();
            if draining.is_some() {
                self.handle_tx.send_replace(None);
            }
            self.state_tx.send_replace(ConnectionState::Connecting);
            (state.epoch, draining)
        };

        if retry_seq.is_some() {
            info!("Retrying presence connection");
        }

        if let Some(handle) = draining {
            debug!(socket_id = %handle.id(), "Waiting for closing socket");
            handle.close().await;
        }

        let url = match self.authenticated_url().await {
            Ok(url) => url,
            Err(e) => {
                // No automatic retry without a credential.
                error!("No ID token available for presence connection: {}", e);
                let mut state = self.state.lock();
                state.connecting = false;
                if state.epoch == epoch {
                    self.publish(ConnectionState::Disconnected, None);
                }
                return ConnectOutcome::Failed(e);
            }
        };

        let endpoint = redact_token(&url);
        info!(url = %endpoint, "Connecting to presence endpoint");

        let opened = match timeout(self.config.connect_timeout, self.connector.connect(&url)).await
        {
            Ok(result) => result,
            Err(_) => Err(PresenceError::ConnectTimeout),
        };

        let transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                error!(
                    ready_state = "closed",
                    url = %endpoint,
                    protocol = %url.scheme(),
                    "WebSocket error while connecting: {}",
                    e
                );
                let mut state = self.state.lock();
                state.connecting = false;
                if state.epoch != epoch {
                    info!("Failed connection attempt superseded by disconnect");
                    return ConnectOutcome::Superseded;
                }
                // A failed handshake is reported as an abnormal close.
                self.close_locked(state, CloseEvent::abnormal(e.to_string()));
                return ConnectOutcome::Failed(e);
            }
        };

        let (handle, driver) = open_socket(
            transport,
            endpoint,
            url.scheme().to_string(),
            self.config.close_timeout,
        );

        // Published before the driver runs so its close always lands last.
        let superseded = {
            let mut state = self.state.lock();
            state.connecting = false;
            if state.epoch == epoch {
                state.current = Some(handle.clone());
                state.retries = 0;
                self.publish(ConnectionState::Connected, Some(handle.clone()));
                false
            } else {
                true
            }
        };

        let weak: Weak<Inner> = Arc::downgrade(self);
        tokio::spawn(driver.run(Box::new(move |id, event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_close(id, event);
            }
        })));

        if superseded {
            info!(socket_id = %handle.id(), "Connection attempt superseded by disconnect");
            handle.close().await;
            return ConnectOutcome::Superseded;
        }

        info!(socket_id = %handle.id(), "WebSocket connected");

        ConnectOutcome::Opened(handle)
    }

    /// Fetch a fresh ID token and build the endpoint URL carrying it
    async fn authenticated_url(&self) -> Result<Url> {
        let session = self
            .identity
            .fetch_current_session()
            .await
            .map_err(|e| match e {
                e if e.is_credential_error() => e,
                e => PresenceError::Authentication(e.to_string()),
            })?;
        let token = session
            .id_token()
            .ok_or(PresenceError::CredentialUnavailable)?;

        Ok(endpoint_with_token(&self.config.endpoint, token))
    }

    /// Close handling for a live socket
    fn on_close(self: &Arc<Self>, socket_id: Uuid, event: CloseEvent) {
        let mut state = self.state.lock();

        match state.current.as_ref() {
            Some(current) if current.id() == socket_id => {
                state.current = None;
            }
            _ => {
                debug!(%socket_id, "Ignoring close of superseded socket");
                return;
            }
        }

        self.close_locked(state, event);
    }

    /// Publish the close and schedule a retry when it was unclean
    ///
    /// Shared by live sockets and failed open attempts. The caller has
    /// already checked the close belongs to the current attempt.
    fn close_locked(
        self: &Arc<Self>,
        mut state: MutexGuard<'_, ManagerState>,
        event: CloseEvent,
    ) {
        self.publish(ConnectionState::Disconnected, None);

        if event.was_clean {
            debug!(code = event.code, "Clean close, not reconnecting");
            return;
        }

        let max_retries = self.config.max_retries;
        if max_retries > 0 && state.retries >= max_retries {
            warn!(
                retries = state.retries,
                "Giving up on automatic reconnection"
            );
            return;
        }

        state.retries += 1;
        state.retry_seq += 1;
        let seq = state.retry_seq;
        let token = CancellationToken::new();
        state.cancel_retry();
        state.retry = Some(PendingRetry {
            seq,
            token: token.clone(),
        });
        drop(state);

        let delay = self.config.retry_delay;
        info!(
            delay_ms = delay.as_millis() as u64,
            "Connection was not clean, scheduling reconnect"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    inner.connect(Some(seq)).await;
                }
            }
        });
    }

    fn publish(&self, state: ConnectionState, handle: Option<SocketHandle>) {
        self.state_tx.send_replace(state);
        self.handle_tx.send_replace(handle);
    }
}

/// Append the bearer token as the `token` query parameter
pub fn endpoint_with_token(endpoint: &Url, token: &str) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut().append_pair("token", token);
    url
}

/// URL safe for logs
fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "REDACTED".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
