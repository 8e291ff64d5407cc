//! Socket handle and per-socket driver task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transport::{Frame, Transport};
use super::{CloseEvent, ReadyState, SocketEvent};
use crate::error::{PresenceError, Result};

/// Maximum number of events buffered per subscriber
pub const SOCKET_EVENT_BUFFER: usize = 256;

/// Maximum number of outbound commands queued for the driver
const SOCKET_COMMAND_BUFFER: usize = 64;

enum SocketCommand {
    Send(String),
    Close,
}

struct SocketShared {
    id: Uuid,
    endpoint: String,
    protocol: String,
    commands: mpsc::Sender<SocketCommand>,
    events: broadcast::Sender<SocketEvent>,
    ready_state: watch::Receiver<ReadyState>,
    close_timeout: Duration,
}

/// Handle to one live socket
///
/// Cheap to clone. A handle is never reused: the manager replaces it wholesale
/// on reconnect, so consumers compare handles to notice a new connection.
#[derive(Clone)]
pub struct SocketHandle {
    shared: Arc<SocketShared>,
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}

impl Eq for SocketHandle {}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.shared.id)
            .field("endpoint", &self.shared.endpoint)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl SocketHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Endpoint URL with the token redacted
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// URL scheme of the endpoint (`ws` or `wss`)
    pub fn protocol(&self) -> &str {
        &self.shared.protocol
    }

    pub fn ready_state(&self) -> ReadyState {
        *self.shared.ready_state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Subscribe to socket events
    ///
    /// Events emitted before the call are not replayed; check
    /// [`ready_state`](Self::ready_state) for the current state.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.events.subscribe()
    }

    /// Queue a text frame
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        if !self.is_open() {
            return Err(PresenceError::SocketClosed);
        }
        self.shared
            .commands
            .send(SocketCommand::Send(text.into()))
            .await
            .map_err(|_| PresenceError::SocketClosed)
    }

    /// Close the socket and wait for the closing handshake to finish
    pub async fn close(&self) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }

        // A send error means the driver already exited.
        let _ = self.shared.commands.send(SocketCommand::Close).await;

        if tokio::time::timeout(self.shared.close_timeout, self.closed())
            .await
            .is_err()
        {
            warn!(socket_id = %self.shared.id, "Timed out waiting for socket to close");
        }
    }

    /// Wait until the socket is closed
    pub async fn closed(&self) {
        let mut ready_state = self.shared.ready_state.clone();
        // The driver dropping its sender also means closed.
        let _ = ready_state.wait_for(|s| *s == ReadyState::Closed).await;
    }
}

/// Callback invoked once with the socket id and its close event
pub(crate) type CloseCallback = Box<dyn FnOnce(Uuid, CloseEvent) + Send>;

/// Driver task owning the transport of one socket
pub(crate) struct SocketDriver {
    id: Uuid,
    endpoint: String,
    protocol: String,
    transport: Box<dyn Transport>,
    commands: mpsc::Receiver<SocketCommand>,
    events: broadcast::Sender<SocketEvent>,
    ready_state: watch::Sender<ReadyState>,
    close_timeout: Duration,
}

/// Wrap an open transport into a handle and its (not yet running) driver
pub(crate) fn open_socket(
    transport: Box<dyn Transport>,
    endpoint: String,
    protocol: String,
    close_timeout: Duration,
) -> (SocketHandle, SocketDriver) {
    let id = Uuid::new_v4();
    let (commands_tx, commands_rx) = mpsc::channel(SOCKET_COMMAND_BUFFER);
    let (events_tx, _) = broadcast::channel(SOCKET_EVENT_BUFFER);
    let (ready_tx, ready_rx) = watch::channel(ReadyState::Open);

    let handle = SocketHandle {
        shared: Arc::new(SocketShared {
            id,
            endpoint: endpoint.clone(),
            protocol: protocol.clone(),
            commands: commands_tx,
            events: events_tx.clone(),
            ready_state: ready_rx,
            close_timeout,
        }),
    };

    let driver = SocketDriver {
        id,
        endpoint,
        protocol,
        transport,
        commands: commands_rx,
        events: events_tx,
        ready_state: ready_tx,
        close_timeout,
    };

    (handle, driver)
}

impl SocketDriver {
    /// Pump frames until the socket closes, then report the close event
    pub(crate) async fn run(mut self, on_close: CloseCallback) {
        self.emit(SocketEvent::Open);

        let event = self.pump().await;

        self.ready_state.send_replace(ReadyState::Closed);
        info!(
            socket_id = %self.id,
            code = event.code,
            reason = %event.reason,
            was_clean = event.was_clean,
            "WebSocket disconnected"
        );
        self.emit(SocketEvent::Close(event.clone()));

        on_close(self.id, event);
    }

    async fn pump(&mut self) -> CloseEvent {
        let mut received_close: Option<CloseEvent> = None;
        let mut close_deadline: Option<Instant> = None;

        loop {
            let accepting_commands = close_deadline.is_none();

            tokio::select! {
                command = self.commands.recv(), if accepting_commands => match command {
                    Some(SocketCommand::Send(text)) => {
                        if let Err(e) = self.transport.send_text(text).await {
                            self.report_error(&e);
                            return CloseEvent::abnormal(e.to_string());
                        }
                    }
                    // All handles dropped also closes the socket.
                    Some(SocketCommand::Close) | None => {
                        debug!(socket_id = %self.id, "Closing socket");
                        self.ready_state.send_replace(ReadyState::Closing);
                        close_deadline = Some(Instant::now() + self.close_timeout);
                        if let Err(e) = self.transport.close().await {
                            self.report_error(&e);
                            return CloseEvent::abnormal(e.to_string());
                        }
                    }
                },
                frame = next_frame_until(&mut self.transport, close_deadline) => match frame {
                    FrameResult::Frame(Frame::Text(text)) => {
                        self.emit(SocketEvent::Message(text));
                    }
                    FrameResult::Frame(Frame::Close { code, reason }) => {
                        // Drain until the transport ends so the reply gets flushed.
                        if received_close.is_none() {
                            received_close = Some(CloseEvent::clean(code, reason));
                        }
                        if close_deadline.is_none() {
                            self.ready_state.send_replace(ReadyState::Closing);
                            close_deadline = Some(Instant::now() + self.close_timeout);
                        }
                    }
                    FrameResult::Error(e) => {
                        if let Some(event) = received_close {
                            return event;
                        }
                        self.report_error(&e);
                        return CloseEvent::abnormal(e.to_string());
                    }
                    FrameResult::Ended => {
                        return received_close
                            .unwrap_or_else(|| CloseEvent::abnormal("connection dropped"));
                    }
                    FrameResult::TimedOut => {
                        return received_close
                            .unwrap_or_else(|| CloseEvent::abnormal("close handshake timed out"));
                    }
                },
            }
        }
    }

    fn report_error(&self, e: &PresenceError) {
        error!(
            socket_id = %self.id,
            ready_state = ?*self.ready_state.borrow(),
            url = %self.endpoint,
            protocol = %self.protocol,
            "WebSocket error: {}",
            e
        );
        self.emit(SocketEvent::Error(e.to_string()));
    }

    fn emit(&self, event: SocketEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

enum FrameResult {
    Frame(Frame),
    Error(PresenceError),
    Ended,
    TimedOut,
}

async fn next_frame_until(
    transport: &mut Box<dyn Transport>,
    deadline: Option<Instant>,
) -> FrameResult {
    let next = match deadline {
        Some(deadline) => match timeout_at(deadline, transport.next_frame()).await {
            Ok(next) => next,
            Err(_) => return FrameResult::TimedOut,
        },
        None => transport.next_frame().await,
    };

    match next {
        Some(Ok(frame)) => FrameResult::Frame(frame),
        Some(Err(e)) => FrameResult::Error(e),
        None => FrameResult::Ended,
    }
}
