use serde::{Deserialize, Serialize};

/// Control messages the application can post to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate as soon as possible instead of waiting for clients to close
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a JSON message such as `{"type":"SKIP_WAITING"}`. Unknown messages yield `None`.
    pub fn from_json(message: &str) -> Option<Self> {
        serde_json::from_str(message).ok()
    }
}
