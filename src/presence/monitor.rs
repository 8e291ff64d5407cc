//! Presence monitor service
//!
//! Re-subscribes to every socket the manager publishes, keeps an
//! [`OnlineStatus`] up to date and runs the liveness check: a connected socket
//! that stays silent past `stale_after` is replaced via `reconnect()`.

use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::status::{OnlineStatus, StatusSnapshot};
use crate::config::PresenceConfig;
use crate::connection::{ConnectionManager, SocketEvent, SocketHandle};

/// Presence monitor
pub struct PresenceMonitor {
    manager: ConnectionManager,
    config: PresenceConfig,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl PresenceMonitor {
    pub fn new(manager: ConnectionManager, config: PresenceConfig) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            manager,
            config,
            status_tx,
        }
    }

    /// Subscribe to status snapshots
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Run the monitor (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting presence monitor (liveness interval: {}ms, stale after: {}ms)",
            self.config.liveness_interval.as_millis(),
            self.config.stale_after.as_millis()
        );

        let mut handles = self.manager.subscribe_handle();
        let mut status = OnlineStatus::new(Instant::now());
        let mut events = None;

        let initial = handles.borrow_and_update().clone();
        attach(initial, &mut status, &mut events);
        self.publish(&status);

        let mut liveness = interval(self.config.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                changed = handles.changed() => {
                    if changed.is_err() {
                        debug!("Connection manager dropped");
                        break;
                    }
                    let handle = handles.borrow_and_update().clone();
                    attach(handle, &mut status, &mut events);
                }
                event = next_event(&mut events) => match event {
                    Ok(SocketEvent::Open) => status.on_open(Instant::now()),
                    Ok(SocketEvent::Message(text)) => {
                        status.on_text(&text, Instant::now());
                    }
                    Ok(SocketEvent::Error(e)) => debug!("Socket reported error: {}", e),
                    Ok(SocketEvent::Close(_)) => status.on_close(),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Presence monitor lagged, missed {} socket events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                },
                _ = liveness.tick() => {
                    if status.is_stale(Instant::now(), self.config.stale_after) {
                        warn!(
                            idle_ms = Instant::now()
                                .saturating_duration_since(status.last_activity())
                                .as_millis() as u64,
                            "Connection appears stale, attempting to reconnect"
                        );
                        self.manager.reconnect().await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Presence monitor shutting down");
                        break;
                    }
                }
            }

            self.publish(&status);
        }
    }

    fn publish(&self, status: &OnlineStatus) {
        let snapshot = status.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Point the status and event stream at a newly published handle
fn attach(
    handle: Option<SocketHandle>,
    status: &mut OnlineStatus,
    events: &mut Option<broadcast::Receiver<SocketEvent>>,
) {
    match handle {
        Some(handle) => {
            debug!(socket_id = %handle.id(), "Following new socket");
            *events = Some(handle.subscribe());
            if handle.is_open() {
                status.on_open(Instant::now());
            } else {
                status.on_close();
            }
        }
        None => {
            *events = None;
            status.on_close();
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<SocketEvent>>,
) -> Result<SocketEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle for managing the presence monitor
pub struct PresenceMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl PresenceMonitorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for PresenceMonitorHandle {
    fn default() -> Self {
        Self::new().0
    }
}
