//! Save Upload & Download
//!
//! `GET /files/{gameId}` returns the latest save of a game; `PUT` stores a
//! new one. Every check runs before anything is persisted, in this order:
//!
//! ```text
//! client gate ─► id shape ─► credentials ─► body limit ─► decode
//!   ─► embedded id == URL id ─► caller in save ─► caller in stored game
//!   ─► persist
//! ```

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::{FromRequestParts, Path, State};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::StatusCode;
use chrono::Utc;
use http_body_util::LengthLimitError;
use tracing::{debug, error, info, warn};

use crate::core::codec::SaveCodec;
use crate::core::game_id::GameRef;
use crate::network::auth::AuthenticatedPlayer;
use crate::network::error::ApiError;
use crate::network::server::AppState;
use crate::store::{SaveKind, StoreError, StoredSave};

/// A `/files` request that passed the client gate, the id check and
/// authentication.
#[derive(Debug, Clone)]
pub struct FileRequest {
    /// Addressed game and slot.
    pub game: GameRef,
    /// Verified caller.
    pub player: AuthenticatedPlayer,
}

impl FileRequest {
    fn kind(&self) -> SaveKind {
        SaveKind::from_preview(self.game.preview)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for FileRequest {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(prefix) = &state.config.client_ua_prefix {
            let user_agent = parts
                .headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !user_agent.starts_with(prefix.as_str()) {
                return Err(ApiError::Forbidden("unsupported client".into()));
            }
        }

        let Path(raw_id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::BadRequest("missing game id".into()))?;
        let game = GameRef::parse(&raw_id)
            .ok_or_else(|| ApiError::BadRequest("invalid game id".into()))?;

        let player = AuthenticatedPlayer::from_request_parts(parts, state).await?;

        Ok(FileRequest { game, player })
    }
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let cause = e.into_inner();
        if cause.is::<LengthLimitError>() {
            ApiError::PayloadTooLarge { limit }
        } else {
            ApiError::BadRequest(format!("failed to read body: {}", cause))
        }
    })
}

/// `GET /files/{gameId}`
pub async fn download(
    State(state): State<AppState>,
    request: FileRequest,
) -> Result<String, ApiError> {
    let save = state
        .store
        .latest_file(&request.game.base_id, request.kind())
        .await?
        .ok_or_else(|| ApiError::NotFound("no save stored for this game".into()))?;

    SaveCodec::encode(&save.data).map_err(|e| ApiError::Internal(format!("encode failed: {}", e)))
}

/// `PUT /files/{gameId}`
pub async fn upload(
    State(state): State<AppState>,
    request: FileRequest,
    body: Body,
) -> Result<StatusCode, ApiError> {
    let FileRequest { game, player } = &request;
    let bytes = read_body(body, state.config.max_upload_bytes).await?;

    // Invalid UTF-8 becomes replacement characters and fails base64 decoding
    let payload = state.codec.decode(&String::from_utf8_lossy(&bytes)).map_err(|e| {
        warn!(player_id = %player.player_id, game_id = %game.base_id, stage = e.stage().as_str(), "rejected save: {}", e);
        ApiError::from(e)
    })?;

    if payload.game_id != game.base_id {
        warn!(player_id = %player.player_id, expected = %game.base_id, actual = %payload.game_id, "game id mismatch");
        return Err(ApiError::BadRequest("game id does not match the save".into()));
    }

    if !payload.has_participant(&player.player_id) {
        warn!(player_id = %player.player_id, game_id = %game.base_id, "uploader is not in the save");
        return Err(ApiError::Forbidden("not a participant".into()));
    }

    let existing = match state.store.get_game(&game.base_id).await? {
        Some(existing) => Some(existing),
        None => match state
            .store
            .create_game(&game.base_id, &payload.participant_ids)
            .await
        {
            Ok(()) => {
                info!(game_id = %game.base_id, players = payload.participant_ids.len(), "game created");
                None
            }
            // Another upload created it first; treat it as an existing game
            Err(StoreError::Conflict { .. }) => {
                debug!(game_id = %game.base_id, "game created concurrently");
                let created = state.store.get_game(&game.base_id).await?;
                Some(created.ok_or_else(|| {
                    ApiError::Internal(format!("game {} vanished after create conflict", game.base_id))
                })?)
            }
            Err(e) => return Err(e.into()),
        },
    };

    if let Some(existing) = existing {
        if !existing.has_player(&player.player_id) {
            warn!(player_id = %player.player_id, game_id = %game.base_id, "uploader is not a recorded member");
            return Err(ApiError::Forbidden("not a member of this game".into()));
        }
        if let Err(e) = state
            .store
            .update_game_players(&game.base_id, &payload.participant_ids)
            .await
        {
            error!(game_id = %game.base_id, error = %e, "failed to update game players");
        }
    }

    let turns = payload.turn_number;
    state
        .store
        .save_file(
            request.kind(),
            StoredSave {
                game_id: game.base_id.clone(),
                turns,
                created_player: player.player_id.clone(),
                created_ip: player.address.clone(),
                created_at: Utc::now(),
                data: payload.raw_body,
            },
        )
        .await?;
    state.store.touch_game(&game.base_id).await?;

    info!(game_id = %game.base_id, turns, preview = game.preview, player_id = %player.player_id, "save stored");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::network::server::router;
    use crate::store::gated::{GatedStore, Lookup};
    use crate::store::{GameStore, MemoryStore};
    use axum::http::header::AUTHORIZATION;
    use axum::http::Request;
    use axum::Router;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const GAME: &str = "11111111-1111-1111-1111-111111111111";
    const P1: &str = "aaaaaaaa-0000-4000-8000-000000000001";
    const P2: &str = "aaaaaaaa-0000-4000-8000-000000000002";
    const P3: &str = "aaaaaaaa-0000-4000-8000-000000000003";
    const PASSWORD: &str = "secret1";

    struct Harness {
        app: Router,
        store: Arc<MemoryStore>,
    }

    async fn harness(config: ServerConfig) -> Harness {
        let store = Arc::new(MemoryStore::new());
        for p in [P1, P2, P3] {
            store.create_player(p, PASSWORD, "127.0.0.1").await.unwrap();
        }
        Harness {
            app: router(AppState::new(config, store.clone())),
            store,
        }
    }

    fn save_for(game_id: &str, turns: u32, humans: &[&str]) -> String {
        let players: Vec<Value> = humans
            .iter()
            .map(|p| json!({ "playerId": p, "playerType": "Human" }))
            .chain(std::iter::once(json!({ "playerId": "", "playerType": "AI" })))
            .collect();
        let doc = json!({
            "gameId": game_id,
            "turns": turns,
            "gameParameters": { "players": players },
        });
        SaveCodec::encode(doc.to_string().as_bytes()).unwrap()
    }

    fn request(method: &str, id: &str, player: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(format!("/files/{id}"))
            .header(USER_AGENT, "Unciv/4.11.0-GNU")
            .header(
                AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(format!("{player}:{PASSWORD}"))),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        (status, response.into_body().collect().await.unwrap().to_bytes())
    }

    fn message(body: &Bytes) -> String {
        let v: Value = serde_json::from_slice(body).unwrap();
        assert_eq!(v["type"], "error");
        v["message"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let h = harness(ServerConfig::default()).await;
        let wire = save_for(GAME, 7, &[P1, P2]);

        let (status, _) = send(&h.app, request("PUT", GAME, P1, wire)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let game = h.store.get_game(GAME).await.unwrap().unwrap();
        assert_eq!(game.players, vec![P1.to_string(), P2.to_string()]);

        let (status, body) = send(&h.app, request("GET", GAME, P2, String::new())).await;
        assert_eq!(status, StatusCode::OK);
        let payload = SaveCodec::default()
            .decode(std::str::from_utf8(&body).unwrap())
            .unwrap();
        assert_eq!(payload.game_id, GAME);
        assert_eq!(payload.turn_number, 7);

        let stored = h.store.latest_file(GAME, SaveKind::Content).await.unwrap().unwrap();
        assert_eq!(stored.created_player, P1);
        assert_eq!(stored.turns, 7);
    }

    #[tokio::test]
    async fn test_preview_slot_is_separate() {
        let h = harness(ServerConfig::default()).await;
        let preview_id = format!("{GAME}_Preview");

        let (status, _) = send(&h.app, request("PUT", &preview_id, P1, save_for(GAME, 3, &[P1]))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        assert!(h.store.latest_file(GAME, SaveKind::Preview).await.unwrap().is_some());
        let (status, _) = send(&h.app, request("GET", GAME, P1, String::new())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_participant_rejected() {
        let h = harness(ServerConfig::default()).await;
        let (status, body) = send(&h.app, request("PUT", GAME, P3, save_for(GAME, 1, &[P1, P2]))).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(message(&body), "not a participant");
        assert!(h.store.get_game(GAME).await.unwrap().is_none());
        assert_eq!(h.store.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_recorded_membership_enforced() {
        let h = harness(ServerConfig::default()).await;
        send(&h.app, request("PUT", GAME, P1, save_for(GAME, 1, &[P1, P2]))).await;

        // P3 lists itself in a forged save for an existing game
        let (status, body) = send(&h.app, request("PUT", GAME, P3, save_for(GAME, 2, &[P3]))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(message(&body), "not a member of this game");

        let stored = h.store.latest_file(GAME, SaveKind::Content).await.unwrap().unwrap();
        assert_eq!(stored.turns, 1);
        let game = h.store.get_game(GAME).await.unwrap().unwrap();
        assert!(!game.has_player(P3));
    }

    #[tokio::test]
    async fn test_participants_follow_latest_upload() {
        let h = harness(ServerConfig::default()).await;
        send(&h.app, request("PUT", GAME, P1, save_for(GAME, 1, &[P1, P2]))).await;
        let (status, _) = send(&h.app, request("PUT", GAME, P2, save_for(GAME, 2, &[P2, P3]))).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let game = h.store.get_game(GAME).await.unwrap().unwrap();
        assert!(game.has_player(P3));
        assert!(!game.has_player(P1));
    }

    async fn gated_app() -> (Router, Arc<GatedStore>) {
        let store = Arc::new(GatedStore::new(Lookup::Game, 2));
        for p in [P1, P2, P3] {
            store.inner.create_player(p, PASSWORD, "127.0.0.1").await.unwrap();
        }
        (router(AppState::new(ServerConfig::default(), store.clone())), store)
    }

    #[tokio::test]
    async fn test_concurrent_first_uploads_both_succeed() {
        let (app, store) = gated_app().await;

        // Both lookups see no game before either create runs
        let (first, second) = tokio::join!(
            send(&app, request("PUT", GAME, P1, save_for(GAME, 1, &[P1, P2]))),
            send(&app, request("PUT", GAME, P2, save_for(GAME, 1, &[P1, P2]))),
        );

        assert_eq!(first.0, StatusCode::NO_CONTENT);
        assert_eq!(second.0, StatusCode::NO_CONTENT);
        let game = store.get_game(GAME).await.unwrap().unwrap();
        assert_eq!(game.players, vec![P1.to_string(), P2.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_create_checks_membership() {
        let (app, store) = gated_app().await;

        let (member, outsider) = tokio::join!(
            send(&app, request("PUT", GAME, P1, save_for(GAME, 1, &[P1, P2]))),
            send(&app, request("PUT", GAME, P3, save_for(GAME, 1, &[P3]))),
        );

        // Whichever create lands first, the other upload is judged against it
        let mut statuses = [member.0, outsider.0];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::NO_CONTENT, StatusCode::FORBIDDEN]);
        assert_eq!(store.inner.file_count().await, 1);
    }

    #[tokio::test]
    async fn test_game_id_mismatch() {
        let h = harness(ServerConfig::default()).await;
        let other = "22222222-2222-2222-2222-222222222222";
        let (status, _) = send(&h.app, request("PUT", GAME, P1, save_for(other, 1, &[P1]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(h.store.file_count().await, 0);
    }

    #[tokio::test]
    async fn test_corrupt_payloads() {
        let h = harness(ServerConfig::default()).await;

        let (status, body) = send(&h.app, request("PUT", GAME, P1, String::new())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message(&body).contains("input"));

        let (status, body) = send(&h.app, request("PUT", GAME, P1, "@@not base64@@".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message(&body).contains("encoding"));

        let (status, body) = send(&h.app, request("PUT", GAME, P1, STANDARD.encode(b"plain"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(message(&body).contains("decompression"));
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let config = ServerConfig {
            max_upload_bytes: 64,
            ..ServerConfig::default()
        };
        let h = harness(config).await;
        let (status, _) = send(&h.app, request("PUT", GAME, P1, "A".repeat(65))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_gate_order() {
        let h = harness(ServerConfig::default()).await;

        // Wrong client wins over a bad id and missing credentials
        let req = Request::builder()
            .method("GET")
            .uri("/files/not-an-id")
            .header(USER_AGENT, "curl/8.0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h.app, req).await.0, StatusCode::FORBIDDEN);

        // Bad id wins over missing credentials
        let req = Request::builder()
            .method("GET")
            .uri("/files/not-an-id")
            .header(USER_AGENT, "Unciv/4.11.0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h.app, req).await.0, StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .method("GET")
            .uri(format!("/files/{GAME}"))
            .header(USER_AGENT, "Unciv/4.11.0")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h.app, req).await.0, StatusCode::UNAUTHORIZED);

        // Existing players only: no auto-registration here
        let stranger = "bbbbbbbb-0000-4000-8000-000000000009";
        let (status, _) = send(&h.app, request("GET", GAME, stranger, String::new())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_client_gate_disabled() {
        let config = ServerConfig {
            client_ua_prefix: None,
            ..ServerConfig::default()
        };
        let h = harness(config).await;
        send(&h.app, request("PUT", GAME, P1, save_for(GAME, 1, &[P1]))).await;

        let req = Request::builder()
            .method("GET")
            .uri(format!("/files/{GAME}"))
            .header(
                AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(format!("{P1}:{PASSWORD}"))),
            )
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&h.app, req).await.0, StatusCode::OK);
    }
}
