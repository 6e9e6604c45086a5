use serde::{Deserialize, Serialize};
use std::fmt;

/// Telegram numeric user id. All per-user state is keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Opaque reference to an uploaded photo, resolvable by the chat transport
/// (a Telegram file id in production).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef(pub String);

impl fmt::Display for PhotoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of one chat message, enough to delete it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// The orchestration-relevant fields captured from one inbound message.
///
/// `message_id` doubles as the sequence number: Telegram assigns them in
/// increasing order within a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub message_id: i32,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// Highest-resolution size when the message carried a photo.
    pub photo: Option<PhotoRef>,
}
