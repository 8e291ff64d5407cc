//! Real-time connection management
//!
//! A [`ConnectionManager`] owns at most one live socket to the presence
//! endpoint. Each attempt is authenticated with a freshly fetched ID token and
//! unclean drops are retried after a fixed delay.

mod manager;
mod socket;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{ConnectOutcome, ConnectionManager};
pub use socket::SocketHandle;
pub use transport::{Connector, Frame, Transport, WsConnector};

use serde::Serialize;

/// Close code reported when the connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code sent on a normal, client-initiated close
pub const CLOSE_NORMAL: u16 = 1000;

/// Connection state owned by the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Ready state of a single socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Open,
    Closing,
    Closed,
}

/// Details of a socket closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// True when the closing handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: reason.into(),
            was_clean: false,
        }
    }
}

/// Events delivered to socket subscribers, in platform order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Message(String),
    Error(String),
    Close(CloseEvent),
}
