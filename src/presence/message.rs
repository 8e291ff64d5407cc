use serde::{Deserialize, Serialize};

/// Inbound presence frame, tagged on `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Number of users currently online
    OnlineCount { count: u64 },
    /// Any type this client does not understand
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
