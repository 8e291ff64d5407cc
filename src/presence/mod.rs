//! Presence consumer
//!
//! Follows the connection manager's socket handle, tracks the online count
//! and connection status, and forces a reconnect when a connected socket
//! goes silent.

mod message;
mod monitor;
mod status;

pub use message::ServerMessage;
pub use monitor::{PresenceMonitor, PresenceMonitorHandle};
pub use status::{OnlineStatus, StatusSnapshot};
