//! Chat wire format: one JSON object per WebSocket text frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maximum number of characters in a message's content.
pub const MAX_CONTENT_CHARS: usize = 50;

/// Sender id carried by locally generated system messages.
pub const SYSTEM_SENDER_ID: i64 = 0;

// ---------------------------------------------------------------------------
// Message kind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Chat,
    Typing,
    StopTyping,
    System,
}

impl MessageKind {
    /// Typing indicators are delivered to the receiver only and never stored.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Typing | Self::StopTyping)
    }
}

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A chat message as it travels over the socket and out of chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub id: i64,
    #[serde(rename = "senderID")]
    pub sender_id: i64,
    #[serde(rename = "receiverID")]
    pub receiver_id: i64,
    pub content: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

impl ChatMessage {
    /// Build a locally originated system message addressed to `receiver_id`.
    pub fn system(receiver_id: i64, content: impl Into<String>) -> Self {
        Self {
            id: 0,
            sender_id: SYSTEM_SENDER_ID,
            receiver_id,
            content: content.into(),
            created_at: Utc::now(),
            kind: MessageKind::System,
        }
    }

    /// Complete a draft with the id and timestamp assigned by the store.
    pub fn persisted(draft: NewChatMessage, saved: SavedMessage) -> Self {
        Self {
            id: saved.id,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content,
            created_at: saved.created_at,
            kind: draft.kind,
        }
    }

    /// Complete a draft that is relayed without being stored.
    pub fn transient(draft: NewChatMessage) -> Self {
        Self {
            id: 0,
            sender_id: draft.sender_id,
            receiver_id: draft.receiver_id,
            content: draft.content,
            created_at: Utc::now(),
            kind: draft.kind,
        }
    }
}

/// Identity assigned to a message by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedMessage {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

/// A validated message that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub kind: MessageKind,
}

// ---------------------------------------------------------------------------
// Client → Server frame
// ---------------------------------------------------------------------------

/// A frame received from the client. `senderID`, `id` and `createdAt` are
/// server-assigned, so any client-supplied values are ignored.
#[derive(Debug, Deserialize)]
pub struct IncomingFrame {
    #[serde(rename = "receiverID", alias = "receiver_id")]
    pub receiver_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}
