//! Player Authentication
//!
//! Game clients send `Authorization: Basic base64(playerId:password)` on
//! every request. The server keeps no client-side tokens; each request is
//! verified against the player store.
//!
//! Request metadata (client address, verified player, console session) is
//! carried explicitly through axum extractors rather than an untyped
//! request context.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::core::game_id::validate_player_id;
use crate::network::error::ApiError;
use crate::network::server::AppState;
use crate::network::session::Session;
use crate::store::{GameStore, StoreError};

/// Minimum password length after trimming.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Name of the console session cookie.
pub const SESSION_COOKIE: &str = "session_id";

/// Decoded Basic credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Player identifier (canonical UUID).
    pub player_id: String,
    /// Password.
    pub password: String,
}

/// Reasons a credential header is rejected before any store lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// No `Authorization` header.
    #[error("authentication required")]
    Missing,

    /// Scheme is not `Basic`.
    #[error("unsupported authentication scheme")]
    Scheme,

    /// Payload is not valid base64 or not UTF-8.
    #[error("malformed credentials")]
    Encoding,

    /// Payload has no `:` separator.
    #[error("malformed credentials")]
    Format,

    /// Player id is not a canonical UUID.
    #[error("invalid player id")]
    InvalidPlayerId,

    /// Password shorter than [`MIN_PASSWORD_LEN`].
    #[error("password must be at least {MIN_PASSWORD_LEN} characters")]
    PasswordTooShort,
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        ApiError::Unauthorized(e.to_string())
    }
}

/// Parse an `Authorization` header value.
pub fn parse_basic(header: &str) -> Result<Credentials, CredentialError> {
    let encoded = header.strip_prefix("Basic ").ok_or(CredentialError::Scheme)?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CredentialError::Encoding)?;
    let pair = String::from_utf8(decoded).map_err(|_| CredentialError::Encoding)?;

    let (player_id, password) = pair.split_once(':').ok_or(CredentialError::Format)?;
    let player_id = player_id.trim();
    let password = password.trim();

    if !validate_player_id(player_id) {
        return Err(CredentialError::InvalidPlayerId);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::PasswordTooShort);
    }

    Ok(Credentials {
        player_id: player_id.to_string(),
        password: password.to_string(),
    })
}

/// Parse the credentials carried by a request's headers.
pub fn credentials_from_headers(headers: &HeaderMap) -> Result<Credentials, CredentialError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(CredentialError::Missing)?
        .to_str()
        .map_err(|_| CredentialError::Encoding)?;
    parse_basic(header)
}

/// Verify an existing player's credentials and record the activity.
pub async fn verify_player(
    store: &dyn GameStore,
    creds: &Credentials,
    address: &str,
) -> Result<(), ApiError> {
    match store.get_player(&creds.player_id).await? {
        None => Err(ApiError::Unauthorized("unknown player".into())),
        Some(player) if player.password != creds.password => {
            Err(ApiError::Unauthorized("wrong password".into()))
        }
        Some(_) => {
            touch(store, &creds.player_id, address).await;
            Ok(())
        }
    }
}

/// Verify a player, registering it on first use. Returns whether the player
/// was newly registered.
pub async fn register_or_verify(
    store: &dyn GameStore,
    creds: &Credentials,
    address: &str,
) -> Result<bool, ApiError> {
    let player = match store.get_player(&creds.player_id).await? {
        Some(player) => player,
        None => match store
            .create_player(&creds.player_id, &creds.password, address)
            .await
        {
            Ok(()) => {
                info!(player_id = %creds.player_id, address, "player registered");
                return Ok(true);
            }
            // Registered by a concurrent request; verify against that row
            Err(StoreError::Conflict { .. }) => store
                .get_player(&creds.player_id)
                .await?
                .ok_or_else(|| {
                    ApiError::Internal(format!(
                        "player {} vanished after create conflict",
                        creds.player_id
                    ))
                })?,
            Err(e) => return Err(e.into()),
        },
    };

    if player.password != creds.password {
        return Err(ApiError::Unauthorized("wrong password".into()));
    }
    touch(store, &creds.player_id, address).await;
    Ok(false)
}

async fn touch(store: &dyn GameStore, player_id: &str, address: &str) {
    if let Err(e) = store.touch_player(player_id, address).await {
        error!(player_id, error = %e, "failed to record player activity");
    }
}

// =============================================================================
// CLIENT ADDRESS
// =============================================================================

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Normalize the client address of a request.
///
/// With `trust_proxy` set: first entry of `X-Forwarded-For`, else
/// `X-Real-IP`, else the peer socket address without its port. Without it
/// only the peer address counts.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
            let first = forwarded.split(',').next().unwrap_or(forwarded);
            return first.trim().to_string();
        }
        if let Some(real_ip) = header_str(headers, "x-real-ip") {
            return real_ip.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Value of a named cookie.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

// =============================================================================
// EXTRACTORS
// =============================================================================

/// Normalized client address of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

#[async_trait]
impl FromRequestParts<AppState> for ClientAddress {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientAddress(address_of(parts, state)))
    }
}

fn address_of(parts: &Parts, state: &AppState) -> String {
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_address(&parts.headers, peer, state.config.trust_proxy_headers)
}

/// A verified, already registered player.
#[derive(Debug, Clone)]
pub struct AuthenticatedPlayer {
    /// Player identifier.
    pub player_id: String,
    /// Client address.
    pub address: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedPlayer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let address = address_of(parts, state);
        let creds = credentials_from_headers(&parts.headers)?;
        verify_player(state.store.as_ref(), &creds, &address).await?;

        Ok(AuthenticatedPlayer {
            player_id: creds.player_id,
            address,
        })
    }
}

/// A verified player, registered on first use.
#[derive(Debug, Clone)]
pub struct RegisteringPlayer {
    /// Player identifier.
    pub player_id: String,
    /// Client address.
    pub address: String,
    /// Whether this request registered the player.
    pub registered: bool,
}

#[async_trait]
impl FromRequestParts<AppState> for RegisteringPlayer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let address = address_of(parts, state);
        let creds = credentials_from_headers(&parts.headers)?;
        let registered = register_or_verify(state.store.as_ref(), &creds, &address).await?;

        Ok(RegisteringPlayer {
            player_id: creds.player_id,
            address,
            registered,
        })
    }
}

/// A live console session, looked up from the session cookie.
#[derive(Debug, Clone)]
pub struct SessionUser(pub Session);

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, SESSION_COOKIE)
            .ok_or_else(|| ApiError::Unauthorized("not logged in".into()))?;

        match state.sessions.lookup(token).await {
            Some(session) => Ok(SessionUser(session)),
            None => {
                debug!("rejected unknown or expired session");
                Err(ApiError::Unauthorized("session expired".into()))
            }
        }
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `GET /auth`: verify credentials, registering the player on first use.
pub async fn get_auth(player: RegisteringPlayer) -> &'static str {
    debug!(player_id = %player.player_id, registered = player.registered, "auth check passed");
    "authenticated"
}

/// `PUT /auth`: replace the caller's password with the request body.
pub async fn put_auth(
    State(state): State<AppState>,
    player: RegisteringPlayer,
    body: String,
) -> Result<&'static str, ApiError> {
    let password = body.trim();
    if password.is_empty() {
        return Err(ApiError::BadRequest("password must not be empty".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(
            CredentialError::PasswordTooShort.to_string(),
        ));
    }

    state
        .store
        .update_player_password(&player.player_id, password, &player.address)
        .await?;
    info!(player_id = %player.player_id, "password changed");
    Ok("password updated")
}
