//! Error types for the arbitration server.
//!
//! Registry errors describe violations of the player state machine. They are
//! mapped onto [`ApiError`] at the HTTP edge; rejected collisions are not
//! errors at all and travel inside a normal response body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared::{CombatState, PlayerId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("player not found: {0}")]
    NotFound(PlayerId),
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: PlayerId,
        from: CombatState,
        to: CombatState,
    },
    #[error("player {0} has no combat peer")]
    NoPeer(PlayerId),
}

/// Transport-level failures surfaced with a non-2xx status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("player not found: {0}")]
    NotFound(PlayerId),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
