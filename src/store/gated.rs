//! Test store whose first lookups of one kind meet at a barrier, so
//! concurrent requests all observe the state before any of them writes.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Barrier;

use super::{GameRecord, GameStore, MemoryStore, PlayerRecord, SaveKind, StoreError, StoredSave};

/// Which lookup is held at the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup {
    Player,
    Game,
}

pub(crate) struct GatedStore {
    pub(crate) inner: MemoryStore,
    gated: Lookup,
    pending: AtomicUsize,
    barrier: Barrier,
}

impl GatedStore {
    /// Hold the first `parties` lookups of `gated` until all have arrived.
    pub(crate) fn new(gated: Lookup, parties: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            gated,
            pending: AtomicUsize::new(parties),
            barrier: Barrier::new(parties),
        }
    }

    async fn pass(&self, lookup: Lookup) {
        if lookup != self.gated {
            return;
        }
        let held = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if held {
            self.barrier.wait().await;
        }
    }
}

#[async_trait]
impl GameStore for GatedStore {
    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerRecord>, StoreError> {
        self.pass(Lookup::Player).await;
        self.inner.get_player(player_id).await
    }

    async fn create_player(&self, player_id: &str, password: &str, ip: &str) -> Result<(), StoreError> {
        self.inner.create_player(player_id, password, ip).await
    }

    async fn update_player_password(
        &self,
        player_id: &str,
        password: &str,
        ip: &str,
    ) -> Result<(), StoreError> {
        self.inner.update_player_password(player_id, password, ip).await
    }

    async fn touch_player(&self, player_id: &str, ip: &str) -> Result<(), StoreError> {
        self.inner.touch_player(player_id, ip).await
    }

    async fn get_game(&self, game_id: &str) -> Result<Option<GameRecord>, StoreError> {
        self.pass(Lookup::Game).await;
        self.inner.get_game(game_id).await
    }

    async fn create_game(&self, game_id: &str, players: &[String]) -> Result<(), StoreError> {
        self.inner.create_game(game_id, players).await
    }

    async fn update_game_players(&self, game_id: &str, players: &[String]) -> Result<(), StoreError> {
        self.inner.update_game_players(game_id, players).await
    }

    async fn touch_game(&self, game_id: &str) -> Result<(), StoreError> {
        self.inner.touch_game(game_id).await
    }

    async fn save_file(&self, kind: SaveKind, save: StoredSave) -> Result<(), StoreError> {
        self.inner.save_file(kind, save).await
    }

    async fn latest_file(&self, game_id: &str, kind: SaveKind) -> Result<Option<StoredSave>, StoreError> {
        self.inner.latest_file(game_id, kind).await
    }
}
