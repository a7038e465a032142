use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

/// Reasons a join request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// Another active session already uses the (normalized) name.
    #[error("name `{0}` is already taken")]
    NameTaken(String),
    /// Nothing usable remains after sanitization.
    #[error("name contains no usable characters")]
    InvalidName,
}

impl JoinError {
    /// Stable reason code sent back in the join acknowledgement.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NameTaken(_) => "name_taken",
            Self::InvalidName => "invalid_name",
        }
    }
}

/// Reasons an admin map update is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdminError {
    /// No admin secret is configured.
    #[error("admin updates are disabled")]
    Disabled,
    /// The supplied secret does not match.
    #[error("invalid admin credential")]
    InvalidCredential,
    /// The layout exceeds the configured bounds.
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
}

impl AdminError {
    /// Stable reason code sent back in the admin acknowledgement.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Disabled => "admin_disabled",
            Self::InvalidCredential => "invalid_credential",
            Self::InvalidLayout(_) => "invalid_layout",
        }
    }
}

/// Inbound frames that cannot be turned into a client message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match any message shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The message parsed but carries out-of-range fields.
    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Missing or wrong credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The operation is disabled on this server.
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl From<AdminError> for AppError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Disabled => AppError::Forbidden(err.to_string()),
            AdminError::InvalidCredential => AppError::Unauthorized(err.to_string()),
            AdminError::InvalidLayout(message) => AppError::BadRequest(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
