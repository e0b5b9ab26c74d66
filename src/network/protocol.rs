//! Protocol Messages
//!
//! Wire format for the `/chat` socket. Every frame is a JSON text frame
//! tagged by a `type` field. Liveness uses protocol-level ping/pong control
//! frames and has no application message.

use serde::{Deserialize, Serialize};

// =============================================================================
// PAYLOADS
// =============================================================================

/// A list of game identifiers (`join`, `leave`, `joinSuccess`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameIdList {
    /// Game identifiers.
    #[serde(default)]
    pub game_ids: Vec<String>,
}

/// A chat line addressed to one game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    /// Target game.
    #[serde(default)]
    pub game_id: String,
    /// Sender's civilization name, as shown to other players.
    #[serde(default)]
    pub civ_name: String,
    /// Message text.
    #[serde(default)]
    pub message: String,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Declare interest in games. Advisory; acknowledged with `joinSuccess`.
    Join(GameIdList),

    /// Withdraw interest in games. Advisory.
    Leave(GameIdList),

    /// Send a chat line to every participant of a game.
    Chat(ChatPayload),
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a `join`.
    JoinSuccess(GameIdList),

    /// Relayed chat line.
    Chat(ChatPayload),

    /// Diagnostic for the receiving connection only.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Build an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
