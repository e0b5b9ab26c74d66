//! In-memory [`GameStore`].
//!
//! Keeps the latest snapshot per game and slot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{GameRecord, GameStore, PlayerRecord, SaveKind, StoreError, StoredSave};

/// Process-local store.
#[derive(Default)]
pub struct MemoryStore {
    players: RwLock<HashMap<String, PlayerRecord>>,
    games: RwLock<HashMap<String, GameRecord>>,
    files: RwLock<HashMap<(String, SaveKind), StoredSave>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots across all games and slots.
    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        Ok(self.players.read().await.get(player_id).cloned())
    }

    async fn create_player(&self, player_id: &str, password: &str, ip: &str) -> Result<(), StoreError> {
        let mut players = self.players.write().await;
        if players.contains_key(player_id) {
            return Err(StoreError::Conflict {
                kind: "player",
                id: player_id.to_string(),
            });
        }

        let now = Utc::now();
        players.insert(
            player_id.to_string(),
            PlayerRecord {
                player_id: player_id.to_string(),
                password: password.to_string(),
                created_at: now,
                updated_at: now,
                create_ip: ip.to_string(),
                update_ip: ip.to_string(),
            },
        );
        Ok(())
    }

    async fn update_player_password(
        &self,
        player_id: &str,
        password: &str,
        ip: &str,
    ) -> Result<(), StoreError> {
        let mut players = self.players.write().await;
        let player = players.get_mut(player_id).ok_or_else(|| StoreError::Missing {
            kind: "player",
            id: player_id.to_string(),
        })?;
        player.password = password.to_string();
        player.updated_at = Utc::now();
        player.update_ip = ip.to_string();
        Ok(())
    }

    async fn touch_player(&self, player_id: &str, ip: &str) -> Result<(), StoreError> {
        let mut players = self.players.write().await;
        if let Some(player) = players.get_mut(player_id) {
            player.updated_at = Utc::now();
            player.update_ip = ip.to_string();
        }
        Ok(())
    }

    async fn get_game(&self, game_id: &str) -> Result<Option<GameRecord>, StoreError> {
        Ok(self.games.read().await.get(game_id).cloned())
    }

    async fn create_game(&self, game_id: &str, players: &[String]) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        if games.contains_key(game_id) {
            return Err(StoreError::Conflict {
                kind: "game",
                id: game_id.to_string(),
            });
        }

        let now = Utc::now();
        games.insert(
            game_id.to_string(),
            GameRecord {
                game_id: game_id.to_string(),
                players: players.to_vec(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn update_game_players(&self, game_id: &str, players: &[String]) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        let game = games.get_mut(game_id).ok_or_else(|| StoreError::Missing {
            kind: "game",
            id: game_id.to_string(),
        })?;
        game.players = players.to_vec();
        game.updated_at = Utc::now();
        Ok(())
    }

    async fn touch_game(&self, game_id: &str) -> Result<(), StoreError> {
        let mut games = self.games.write().await;
        let game = games.get_mut(game_id).ok_or_else(|| StoreError::Missing {
            kind: "game",
            id: game_id.to_string(),
        })?;
        game.updated_at = Utc::now();
        Ok(())
    }

    async fn save_file(&self, kind: SaveKind, save: StoredSave) -> Result<(), StoreError> {
        self.files
            .write()
            .await
            .insert((save.game_id.clone(), kind), save);
        Ok(())
    }

    async fn latest_file(&self, game_id: &str, kind: SaveKind) -> Result<Option<StoredSave>, StoreError> {
        Ok(self
            .files
            .read()
            .await
            .get(&(game_id.to_string(), kind))
            .cloned())
    }
}
