//! Unified error handling for nexusd.
//!
//! Services return [`AppError`]; the dispatcher maps it onto the wire
//! `error{message, kind}` event, the HTTP layer onto status codes, and
//! metrics onto stable kind labels.

use axum::http::StatusCode;
use nexus_proto::ServerEvent;
use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur while handling a client event or HTTP request.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad token. Fatal to the socket.
    #[error("invalid token")]
    AuthInvalid,

    /// Expired or revoked token. Fatal to the socket.
    #[error("session expired")]
    AuthExpired,

    /// Permission denied; the event is rejected but the socket stays.
    #[error("you are not allowed to do that")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("rate limited")]
    RateLimited,

    /// Social-graph denial: blocks in either direction, ban lists.
    #[error("{0}")]
    Blocked(String),

    #[error("internal error")]
    Internal(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    /// Stable kind string for the wire and for metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "auth_invalid",
            Self::AuthExpired => "auth_expired",
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation",
            Self::RateLimited => "rate_limited",
            Self::Blocked(_) => "blocked",
            Self::Internal(_) | Self::Store(_) => "internal",
        }
    }

    /// Auth failures terminate the socket after the error event is written.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthInvalid | Self::AuthExpired)
    }

    /// Client-visible message. Internal detail never crosses the wire.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(detail) => {
                tracing::error!(detail = %detail, "internal error");
                "internal error".to_string()
            }
            Self::Store(err) => {
                tracing::error!(error = %err, "store error");
                "internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Wire form of this error.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            message: self.public_message(),
            kind: self.kind().to_string(),
        }
    }

    /// HTTP status for the REST surface.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::AuthInvalid | Self::AuthExpired => StatusCode::UNAUTHORIZED,
            Self::Unauthorized | Self::Blocked(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type for service operations.
pub type AppResult<T> = Result<T, AppError>;
