use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// A new message was persisted and fanned out to the match channel
    ReceiveMessage {
        id: Uuid,
        match_id: Uuid,
        sender_id: Uuid,
        sender_name: String,
        content: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A participant started typing
    TypingStart {
        match_id: Uuid,
        user_id: Uuid,
        sender_name: String,
    },

    /// A participant stopped typing
    TypingStop {
        match_id: Uuid,
        user_id: Uuid,
        sender_name: String,
    },

    /// Something went wrong handling a command (e.g. a message failed to
    /// persist). Delivered only to the offending connection.
    Error { message: String },
}

impl GatewayEvent {
    /// Returns the match_id if this event is scoped to a match channel.
    /// Events that return `None` are connection-local.
    pub fn match_id(&self) -> Option<Uuid> {
        match self {
            Self::ReceiveMessage { match_id, .. } => Some(*match_id),
            Self::TypingStart { match_id, .. } => Some(*match_id),
            Self::TypingStop { match_id, .. } => Some(*match_id),
            Self::Ready { .. } | Self::Error { .. } => None,
        }
    }

    /// The user who caused this event, for events that should not echo back
    /// to their own sender (typing indicators).
    pub fn suppressed_for(&self) -> Option<Uuid> {
        match self {
            Self::TypingStart { user_id, .. } | Self::TypingStop { user_id, .. } => Some(*user_id),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Join a match channel to receive its messages and typing signals
    JoinMatch { match_id: Uuid },

    /// Send a message to a match channel. Persisted first, broadcast on
    /// success.
    SendMessage { match_id: Uuid, content: String },

    /// Indicate typing in a match channel
    TypingStart { match_id: Uuid },

    /// Indicate typing stopped
    TypingStop { match_id: Uuid },
}
