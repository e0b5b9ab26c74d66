//! Chat Socket
//!
//! `/chat` upgrades an authenticated request to a WebSocket. Each socket
//! gets one task that reads frames, answers them and keeps the connection
//! alive with protocol pings:
//!
//! ```text
//!            ┌────────── read deadline (refreshed by any frame) ──┐
//! client ──► │ join  ─► joinSuccess                                │
//!            │ leave ─► (logged)                                   │
//!            │ chat  ─► store lookup ─► relay to game participants │
//!            │ ping every interval, write bounded by deadline      │
//!            └─────────────────────────────────────────────────────┘
//! ```
//!
//! The peer is registered with the relay before the first frame is read and
//! unregistered exactly once when the loop ends, whatever the reason.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{Sink, Stream, StreamExt};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::network::auth::AuthenticatedPlayer;
use crate::network::protocol::{ChatPayload, ClientMessage, ServerMessage};
use crate::network::relay::Peer;
use crate::network::server::AppState;

/// `GET /chat`: authenticate, then upgrade.
///
/// Credentials are checked before the upgrade, so a rejected handshake never
/// reaches the relay.
pub async fn chat_socket(
    State(state): State<AppState>,
    player: AuthenticatedPlayer,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(state.config.socket.max_message_bytes)
        .on_upgrade(move |socket| run_connection(state, player.player_id, socket))
}

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Closed,
    ReadError,
    Idle,
    PingFailed,
    Shutdown,
}

async fn run_connection(state: AppState, player_id: String, socket: WebSocket) {
    let (sink, stream) = socket.split();
    serve_peer(state, player_id, sink, stream).await;
}

/// Run one connection until it ends; returns why it ended.
async fn serve_peer<W, R>(state: AppState, player_id: String, sink: W, mut stream: R) -> Teardown
where
    W: Sink<Message, Error = axum::Error> + Send + 'static,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let timing = state.config.socket.clone();
    let peer = state.relay.create_peer(&player_id, sink);
    state.relay.register(peer.clone()).await;
    info!(player_id = %player_id, peer_id = peer.id(), "chat connection established");

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let mut pings = interval_at(Instant::now() + timing.ping_interval, timing.ping_interval);
    pings.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let idle = sleep(timing.read_timeout);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            frame = stream.next() => {
                idle.as_mut().reset(Instant::now() + timing.read_timeout);
                match frame {
                    Some(Ok(Message::Text(text))) => handle_frame(&state, &peer, &text).await,
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => handle_frame(&state, &peer, &text).await,
                        Err(_) => reply(&peer, ServerMessage::error("invalid message format")).await,
                    },
                    Some(Ok(Message::Close(_))) | None => break Teardown::Closed,
                    // Ping and pong only refresh the deadline
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(player_id = %player_id, error = %e, "chat read failed");
                        break Teardown::ReadError;
                    }
                }
            }
            _ = &mut idle => break Teardown::Idle,
            _ = pings.tick() => {
                if let Err(e) = peer.ping().await {
                    debug!(player_id = %player_id, error = %e, "keep-alive ping failed");
                    break Teardown::PingFailed;
                }
            }
            _ = shutdown_rx.recv() => break Teardown::Shutdown,
        }
    };

    state.relay.unregister(&peer).await;
    peer.close().await;
    info!(player_id = %player_id, peer_id = peer.id(), reason = ?reason, "chat connection closed");
    reason
}

/// Handle one inbound text frame.
async fn handle_frame(state: &AppState, peer: &Arc<Peer>, text: &str) {
    let message = match ClientMessage::from_json(text) {
        Ok(m) => m,
        Err(e) => {
            debug!(player_id = %peer.subject_id(), error = %e, "invalid chat frame");
            reply(peer, ServerMessage::error("invalid message format")).await;
            return;
        }
    };

    match message {
        ClientMessage::Join(list) => {
            info!(player_id = %peer.subject_id(), game_ids = ?list.game_ids, "joined chat");
            reply(peer, ServerMessage::JoinSuccess(list)).await;
        }
        ClientMessage::Leave(list) => {
            info!(player_id = %peer.subject_id(), game_ids = ?list.game_ids, "left chat");
        }
        ClientMessage::Chat(chat) => relay_chat(state, peer, chat).await,
    }
}

/// Deliver a chat line to every live connection of the game's participants.
async fn relay_chat(state: &AppState, peer: &Arc<Peer>, chat: ChatPayload) {
    let lookup = timeout(
        state.config.socket.lookup_timeout,
        state.store.get_game(&chat.game_id),
    )
    .await;

    let game = match lookup {
        Ok(Ok(Some(game))) => game,
        Ok(Ok(None)) => {
            reply(peer, ServerMessage::error("game not found")).await;
            return;
        }
        Ok(Err(e)) => {
            error!(game_id = %chat.game_id, error = %e, "chat game lookup failed");
            reply(peer, ServerMessage::error("failed to send message")).await;
            return;
        }
        Err(_) => {
            warn!(game_id = %chat.game_id, "chat game lookup timed out");
            reply(peer, ServerMessage::error("failed to send message")).await;
            return;
        }
    };

    debug!(player_id = %peer.subject_id(), game_id = %chat.game_id, civ_name = %chat.civ_name, "chat message");
    let message = ServerMessage::Chat(chat);
    match state
        .relay
        .deliver_to_subjects(game.players.iter().map(String::as_str), &message)
        .await
    {
        Ok(delivery) => debug!(
            game_id = %game.game_id,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "chat relayed"
        ),
        Err(e) => error!(game_id = %game.game_id, error = %e, "chat relay failed"),
    }
}

/// Reply on one connection. A failed write is left to the read loop.
async fn reply(peer: &Peer, message: ServerMessage) {
    if let Err(e) = peer.send_message(&message).await {
        debug!(player_id = %peer.subject_id(), error = %e, "reply failed");
    }
}
