//! Presence - real-time presence client
//!
//! Client side of the expert Q&A app's presence channel.
//!
//! ## Features
//!
//! - Single authenticated WebSocket, fresh ID token per connection attempt
//! - Automatic retry after unclean closes, with a cancelable retry timer
//! - Manual reconnect for consumers
//! - Online-count tracking and liveness checks for silent connections

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod presence;

pub use config::Config;
pub use connection::{ConnectOutcome, ConnectionManager, ConnectionState, SocketHandle};
pub use error::{PresenceError, Result};
pub use presence::{PresenceMonitor, PresenceMonitorHandle, StatusSnapshot};
