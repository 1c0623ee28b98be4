//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - **`BridgeError`**: domain failures raised by sessions, stores, the audio analyzer and
//!   the messaging client. Derived with `thiserror` so each variant carries its own message.
//! - **`AppError`**: what HTTP handlers return. It implements actix's `ResponseError` so a
//!   failure turns into a JSON body with a stable `type` field.
//!
//! ## Error Categories:
//! - **Storage**: a session directory, credential file or message database is unusable
//! - **Connection**: the transport could not be brought up (retryable)
//! - **AudioFormat**: the buffer handed to the analyzer is not an Ogg container
//! - **NotConnected / NotFound / InvalidInput**: request-level problems

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Domain error shared by every module below the HTTP layer.
///
/// ## Recoverability:
/// Only `Storage` during session creation is fatal, and only for that one session.
/// Everything else is returned to the caller, who may retry.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Session directory, credential store or message store cannot be created or used
    #[error("storage error: {0}")]
    Storage(String),

    /// Transport connect failed; the session keeps its previous state
    #[error("connection error: {0}")]
    Connection(String),

    /// Missing container signature or empty input
    #[error("audio format error: {0}")]
    AudioFormat(String),

    /// Session ids name directories on disk, so path-like ids are refused
    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    /// Operation needs a live transport
    #[error("not connected")]
    NotConnected,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The messaging client rejected an otherwise valid request
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BridgeError {
    pub fn storage(context: &str, err: impl fmt::Display) -> Self {
        BridgeError::Storage(format!("{}: {}", context, err))
    }
}

impl From<rusqlite::Error> for BridgeError {
    fn from(err: rusqlite::Error) -> Self {
        BridgeError::Storage(format!("message database: {}", err))
    }
}

/// Errors returned from HTTP handlers.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("chat_jid is required".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Server-side failures (storage, protocol)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested message or session does not exist
    NotFound(String),

    /// The session's transport is down
    Conflict(String),

    /// Transport to the messaging service failed
    Upstream(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::Upstream(msg) => write!(f, "Upstream error: {}", msg),
        }
    }
}

/// Maps each error to a status code and a machine-readable type.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "bad_request",
///     "message": "audio format error: missing OggS signature",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "not_connected", msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "connection_error", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Domain errors become HTTP errors with `?` inside handlers.
impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        let message = err.to_string();
        match err {
            BridgeError::Storage(_) | BridgeError::Protocol(_) => AppError::Internal(message),
            BridgeError::Connection(_) => AppError::Upstream(message),
            BridgeError::AudioFormat(_)
            | BridgeError::InvalidSessionId(_)
            | BridgeError::InvalidInput(_) => AppError::BadRequest(message),
            BridgeError::NotFound(_) => AppError::NotFound(message),
            BridgeError::NotConnected => AppError::Conflict(message),
        }
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
