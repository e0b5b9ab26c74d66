//! Relay Server
//!
//! HTTP + WebSocket front end. Routes game-client traffic (`/auth`,
//! `/files`, `/chat`) and the web console login API (`/api/*`), and owns
//! the background sweeps of the throttle and session stores.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ServerConfig;
use crate::core::codec::SaveCodec;
use crate::network::relay::Relay;
use crate::network::session::SessionStore;
use crate::network::throttle::AttemptThrottle;
use crate::network::{auth, chat, files, login};
use crate::store::GameStore;

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind or serve.
    #[error("Failed to bind: {0}")]
    Io(#[from] std::io::Error),
}

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Players, games and saves.
    pub store: Arc<dyn GameStore>,
    /// Login attempt throttle.
    pub throttle: Arc<AttemptThrottle>,
    /// Console sessions.
    pub sessions: Arc<SessionStore>,
    /// Live chat connections.
    pub relay: Arc<Relay>,
    /// Save codec.
    pub codec: SaveCodec,
    /// Shutdown signal observed by socket loops.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Build the shared state for `config` on top of `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn GameStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            throttle: Arc::new(AttemptThrottle::new(config.max_attempts, config.lock_duration)),
            sessions: Arc::new(SessionStore::new(config.session_duration)),
            relay: Arc::new(Relay::new(config.socket.write_timeout)),
            codec: SaveCodec::new(config.max_decoded_bytes),
            config: Arc::new(config),
            store,
            shutdown_tx,
        }
    }
}

/// Health probe consumed by game clients.
async fn is_alive() -> Json<Value> {
    Json(json!({ "authVersion": 1, "chatVersion": 1 }))
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/isalive", get(is_alive))
        .route("/auth", get(auth::get_auth).put(auth::put_auth))
        .route("/files/:game_id", get(files::download).put(files::upload))
        .route("/chat", get(chat::chat_socket))
        .route("/api/login", post(login::login))
        .route("/api/logout", get(login::logout))
        .route("/api/session", get(login::session))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, store: Arc<dyn GameStore>) -> Self {
        Self {
            state: AppState::new(config, store),
        }
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Relay server listening on {}", listener.local_addr()?);

        let throttle_sweep = tokio::spawn(
            self.state
                .throttle
                .clone()
                .run_sweep_loop(self.state.shutdown_tx.subscribe()),
        );
        let session_sweep = tokio::spawn(
            self.state
                .sessions
                .clone()
                .run_sweep_loop(self.state.shutdown_tx.subscribe()),
        );

        let mut shutdown_rx = self.state.shutdown_tx.subscribe();
        let app = router(self.state.clone()).into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Shutdown signal received");
            })
            .await;

        // Sweeps exit on the same signal; abort covers a serve error
        throttle_sweep.abort();
        session_sweep.abort();

        served?;
        Ok(())
    }

    /// Signal shutdown to the listener, sweeps and socket loops.
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
    }

    /// Live chat connections.
    pub async fn connection_count(&self) -> usize {
        self.state.relay.connection_count().await
    }

    /// Stored console sessions.
    pub async fn session_count(&self) -> usize {
        self.state.sessions.len().await
    }
}
