//! HTTP Error Responses
//!
//! Every rejected request carries a JSON body `{"type":"error","message":...}`
//! and a status code derived from the failure class.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::core::codec::DecodeError;
use crate::store::StoreError;

/// Request failures surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong credentials.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// Resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Body exceeds the configured limit.
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge {
        /// Configured limit.
        limit: usize,
    },

    /// Client address is locked out.
    #[error("too many failed attempts, try again in {} seconds", .remaining.as_secs().max(1))]
    Locked {
        /// Time until the lock lifts.
        remaining: Duration,
    },

    /// Upload failed to decode.
    #[error("invalid save ({}): {0}", .0.stage().as_str())]
    Decode(#[from] DecodeError),

    /// Backing store failure. Details stay in the log.
    #[error("internal server error")]
    Dependency(#[from] StoreError),

    /// Any other server-side failure. Details stay in the log.
    #[error("internal server error")]
    Internal(String),
}

impl ApiError {
    /// Status code for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Decode(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Dependency(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always `"error"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Human-readable reason.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Dependency(cause) => error!("Store failure: {}", cause),
            ApiError::Internal(cause) => error!("Internal failure: {}", cause),
            _ => {}
        }
        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
