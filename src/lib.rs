//! # Turn Relay Server
//!
//! Save-game relay and chat hub for asynchronous turn-based multiplayer.
//! Players upload their save after each turn; the next player downloads it.
//! Participants of a game can chat over a persistent socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TURN RELAY SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Save format primitives                    │
//! │  ├── game_id.rs  - Game/player identifier shape checks       │
//! │  └── codec.rs    - base64(gzip(JSON)) save codec             │
//! │                                                              │
//! │  network/        - HTTP + WebSocket surface                  │
//! │  ├── server.rs   - Router, shared state, shutdown            │
//! │  ├── auth.rs     - Basic credentials, request extractors     │
//! │  ├── files.rs    - Save upload/download pipeline             │
//! │  ├── chat.rs     - Per-connection socket loop                │
//! │  ├── relay.rs    - Connection registry and fan-out           │
//! │  ├── protocol.rs - Socket message types                      │
//! │  ├── login.rs    - Console login/logout/session              │
//! │  ├── throttle.rs - Failed-login lockout                      │
//! │  ├── session.rs  - Console session store                     │
//! │  └── error.rs    - HTTP error taxonomy                       │
//! │                                                              │
//! │  store/          - Players, games and saves                  │
//! │  config.rs       - Environment configuration                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shared State
//!
//! The throttle, session store and relay are constructed once per server
//! and handed to handlers through [`network::AppState`]. Each guards its
//! own map with an async lock that is never held across socket or store
//! I/O.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crate::config::{ConfigError, ServerConfig};
pub use crate::core::codec::{DecodeError, SaveCodec, SavePayload};
pub use crate::network::{AppState, RelayServer};
pub use crate::store::{GameStore, MemoryStore, StoreError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
