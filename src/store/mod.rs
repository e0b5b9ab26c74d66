//! Game Data Store
//!
//! Interface to the relational store that owns players, games and saved
//! snapshots. The relay only needs a handful of queries, expressed by the
//! [`GameStore`] trait. [`MemoryStore`] implements it in-process for tests
//! and single-node deployments.

pub mod memory;

#[cfg(test)]
pub(crate) mod gated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryStore;

/// Store failures. Reported to callers as generic server errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or failed the query.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row the operation depends on does not exist.
    #[error("{kind} not found: {id}")]
    Missing {
        /// Row kind, e.g. `"game"`.
        kind: &'static str,
        /// Row key.
        id: String,
    },

    /// A row with the same key already exists.
    #[error("{kind} already exists: {id}")]
    Conflict {
        /// Row kind.
        kind: &'static str,
        /// Row key.
        id: String,
    },
}

/// A registered player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    /// Player identifier.
    pub player_id: String,
    /// Stored password.
    pub password: String,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last successful authentication.
    pub updated_at: DateTime<Utc>,
    /// Address used at registration.
    pub create_ip: String,
    /// Address used most recently.
    pub update_ip: String,
}

/// A game and its recorded participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRecord {
    /// Base game identifier.
    pub game_id: String,
    /// Human participants as of the last accepted upload.
    pub players: Vec<String>,
    /// First upload.
    pub created_at: DateTime<Utc>,
    /// Last accepted upload.
    pub updated_at: DateTime<Utc>,
}

impl GameRecord {
    /// Whether `player_id` is a recorded participant.
    pub fn has_player(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p == player_id)
    }
}

/// Which save slot of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveKind {
    /// Full save.
    Content,
    /// Lightweight preview.
    Preview,
}

impl SaveKind {
    /// Slot addressed by a preview flag.
    pub fn from_preview(preview: bool) -> Self {
        if preview {
            SaveKind::Preview
        } else {
            SaveKind::Content
        }
    }
}

/// A stored save snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSave {
    /// Base game identifier.
    pub game_id: String,
    /// Turn number of the snapshot.
    pub turns: u32,
    /// Uploading player.
    pub created_player: String,
    /// Uploader address.
    pub created_ip: String,
    /// Upload time.
    pub created_at: DateTime<Utc>,
    /// Decompressed document bytes.
    pub data: Vec<u8>,
}

/// Queries the relay issues against the external store.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Fetch a player.
    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, StoreError>;

    /// Register a new player.
    async fn create_player(&self, player_id: &str, password: &str, ip: &str) -> Result<(), StoreError>;

    /// Replace a player's password.
    async fn update_player_password(
        &self,
        player_id: &str,
        password: &str,
        ip: &str,
    ) -> Result<(), StoreError>;

    /// Record a successful authentication.
    async fn touch_player(&self, player_id: &str, ip: &str) -> Result<(), StoreError>;

    /// Fetch a game.
    async fn get_game(&self, game_id: &str) -> Result<Option<GameRecord>, StoreError>;

    /// Create a game with its participant list.
    async fn create_game(&self, game_id: &str, players: &[String]) -> Result<(), StoreError>;

    /// Replace a game's participant list.
    async fn update_game_players(&self, game_id: &str, players: &[String]) -> Result<(), StoreError>;

    /// Bump a game's update timestamp.
    async fn touch_game(&self, game_id: &str) -> Result<(), StoreError>;

    /// Append a save snapshot.
    async fn save_file(&self, kind: SaveKind, save: StoredSave) -> Result<(), StoreError>;

    /// Latest snapshot of the given slot.
    async fn latest_file(&self, game_id: &str, kind: SaveKind) -> Result<Option<StoredSave>, StoreError>;
}
