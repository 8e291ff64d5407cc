//! Online status as seen by the status indicator

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::message::ServerMessage;

/// Point-in-time view published to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub online_count: u64,
}

impl StatusSnapshot {
    pub fn status_label(&self) -> &'static str {
        if self.connected {
            "Connected"
        } else {
            "Disconnected"
        }
    }

    pub fn count_label(&self) -> String {
        let noun = if self.online_count == 1 { "user" } else { "users" };
        format!("{} {} online", self.online_count, noun)
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} · {}", self.status_label(), self.count_label())
    }
}

/// Mutable status tracked from socket events
#[derive(Debug, Clone)]
pub struct OnlineStatus {
    online_count: u64,
    connected: bool,
    last_activity: Instant,
}

impl OnlineStatus {
    pub fn new(now: Instant) -> Self {
        Self {
            online_count: 0,
            connected: false,
            last_activity: now,
        }
    }

    pub fn online_count(&self) -> u64 {
        self.online_count
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn on_open(&mut self, now: Instant) {
        self.connected = true;
        self.last_activity = now;
    }

    pub fn on_close(&mut self) {
        self.connected = false;
    }

    /// Apply an inbound text frame
    ///
    /// Any frame counts as activity. Malformed frames are logged and ignored.
    pub fn on_text(&mut self, text: &str, now: Instant) -> Option<ServerMessage> {
        self.last_activity = now;

        match ServerMessage::parse(text) {
            Ok(ServerMessage::OnlineCount { count }) => {
                debug!(count, "Updating online count");
                self.online_count = count;
                Some(ServerMessage::OnlineCount { count })
            }
            Ok(ServerMessage::Unknown) => {
                debug!(frame = %text, "Ignoring unrecognized message");
                Some(ServerMessage::Unknown)
            }
            Err(e) => {
                warn!("Error parsing presence message: {}", e);
                None
            }
        }
    }

    /// Connected, yet silent for longer than `threshold`
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.connected && now.saturating_duration_since(self.last_activity) > threshold
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            connected: self.connected,
            online_count: self.online_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_count_updates_exactly() {
        let now = Instant::now();
        let mut status = OnlineStatus::new(now);

        status.on_text(r#"{"type":"onlineCount","count":5}"#, now);
        assert_eq!(status.online_count(), 5);

        status.on_text(r#"{"type":"unknown"}"#, now);
        assert_eq!(status.online_count(), 5);

        status.on_text("{broken", now);
        assert_eq!(status.online_count(), 5);
    }

    #[test]
    fn test_stale_only_when_connected() {
        let start = Instant::now();
        let mut status = OnlineStatus::new(start);
        let threshold = Duration::from_secs(30);
        let later = start + Duration::from_secs(31);

        assert!(!status.is_stale(later, threshold));

        status.on_open(start);
        assert!(!status.is_stale(start + Duration::from_secs(30), threshold));
        assert!(status.is_stale(later, threshold));

        status.on_text(r#"{"type":"onlineCount","count":1}"#, later);
        assert!(!status.is_stale(later, threshold));

        status.on_close();
        assert!(!status.is_stale(later + Duration::from_secs(60), threshold));
    }

    #[test]
    fn test_snapshot_labels() {
        let one = StatusSnapshot {
            connected: true,
            online_count: 1,
        };
        assert_eq!(one.to_string(), "Connected · 1 user online");

        let none = StatusSnapshot::default();
        assert_eq!(none.status_label(), "Disconnected");
        assert_eq!(none.count_label(), "0 users online");
    }
}
