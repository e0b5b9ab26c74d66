//! Console Login
//!
//! Username/password login for the web console, guarded by the per-address
//! [`AttemptThrottle`](crate::network::throttle::AttemptThrottle). A
//! successful login yields a fixed-lifetime session carried in the
//! `session_id` cookie.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::network::auth::{cookie_value, ClientAddress, SessionUser, SESSION_COOKIE};
use crate::network::error::ApiError;
use crate::network::server::AppState;

/// `POST /api/login` body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    /// Admin username or player id.
    #[serde(default)]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
}

/// `POST /api/login` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Always true; failures use the error body.
    pub success: bool,
    /// Whether the session has admin privileges.
    pub is_admin: bool,
    /// Logged-in player, for player sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
}

/// `GET /api/session` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Session subject.
    pub user_id: String,
    /// Admin privileges.
    pub is_admin: bool,
}

/// `Set-Cookie` value carrying a new session.
pub fn session_cookie(session_id: &str, max_age: Duration) -> String {
    format!(
        "{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    )
}

/// `Set-Cookie` value removing the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// `POST /api/login`
///
/// The lockout check runs before the body is even parsed, so a locked
/// address learns nothing about its credentials.
pub async fn login(
    State(state): State<AppState>,
    ClientAddress(address): ClientAddress,
    body: Bytes,
) -> Result<Response, ApiError> {
    if state.throttle.is_locked(&address).await {
        let remaining = state.throttle.remaining_lock_time(&address).await;
        warn!(address = %address, "login refused: address locked");
        return Err(ApiError::Locked { remaining });
    }

    let request: LoginRequest = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("invalid request format".into()))?;

    let config = &state.config;
    let (subject, response) =
        if request.username == config.admin_username && request.password == config.admin_password {
            let response = LoginResponse {
                success: true,
                is_admin: true,
                player_id: None,
            };
            (request.username, response)
        } else {
            let player = state
                .store
                .get_player(&request.username)
                .await?
                .filter(|p| p.password == request.password);

            match player {
                Some(player) => {
                    let response = LoginResponse {
                        success: true,
                        is_admin: false,
                        player_id: Some(player.player_id.clone()),
                    };
                    (player.player_id, response)
                }
                None => return Err(login_failed(&state, &address).await),
            }
        };

    state.throttle.reset(&address).await;
    let session_id = state.sessions.create(&subject, response.is_admin).await;
    info!(subject = %subject, is_admin = response.is_admin, address = %address, "console login");

    let cookie = session_cookie(&session_id, state.sessions.session_duration());
    Ok(([(SET_COOKIE, cookie)], Json(response)).into_response())
}

async fn login_failed(state: &AppState, address: &str) -> ApiError {
    if state.throttle.record_failed_attempt(address).await {
        warn!(address, "address locked after repeated login failures");
        return ApiError::Locked {
            remaining: state.throttle.remaining_lock_time(address).await,
        };
    }

    let remaining = state.throttle.remaining_attempts(address).await;
    ApiError::Unauthorized(format!(
        "invalid username or password, {} attempts remaining",
        remaining
    ))
}

/// `GET /api/logout`
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(session_id) = cookie_value(&headers, SESSION_COOKIE) {
        state.sessions.delete(session_id).await;
    }
    ([(SET_COOKIE, clear_session_cookie())], Redirect::to("/"))
}

/// `GET /api/session`
pub async fn session(user: Result<SessionUser, ApiError>) -> Response {
    match user {
        Ok(SessionUser(session)) => Json(SessionInfo {
            user_id: session.subject_id,
            is_admin: session.is_privileged,
        })
        .into_response(),
        Err(e) => ([(SET_COOKIE, clear_session_cookie())], e).into_response(),
    }
}
