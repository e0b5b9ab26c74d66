//! Network Layer
//!
//! HTTP and WebSocket surface of the relay, plus the process-wide stores it
//! shares between connections: the login throttle, the console session
//! store and the chat connection registry.

pub mod auth;
pub mod chat;
pub mod error;
pub mod files;
pub mod login;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod throttle;

pub use auth::{AuthenticatedPlayer, ClientAddress, Credentials, CredentialError, SessionUser};
pub use error::ApiError;
pub use protocol::{ChatPayload, ClientMessage, GameIdList, ServerMessage};
pub use relay::{Delivery, Peer, PeerId, Relay, RelayError};
pub use server::{router, AppState, RelayServer, ServerError};
pub use session::{Session, SessionId, SessionStore};
pub use throttle::{AttemptRecord, AttemptThrottle};
