use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Error body of every JSON API
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: &str) -> Self {
        Self {
            error: error.into(),
            code: Some(code.to_string()),
        }
    }
}

/// Why a request failed the authorization gate.
///
/// The detail carried by `InvalidToken` and `KeyNotFound` is for logs only;
/// responses carry the terse message of the variant.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No authorization header")]
    NoAuthHeader,

    #[error("Invalid authorization scheme")]
    InvalidScheme,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token has no jti")]
    MissingJti,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Missing permission: {0}")]
    MissingPermission(String),

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NoAuthHeader => "NO_AUTH_HEADER",
            AuthError::InvalidScheme => "INVALID_AUTH_SCHEME",
            AuthError::InvalidToken(_) => "INVALID_TOKEN",
            AuthError::MissingJti => "MISSING_JTI",
            AuthError::TokenRevoked => "TOKEN_REVOKED",
            AuthError::MissingPermission(_) => "MISSING_PERMISSION",
            AuthError::KeyNotFound(_) => "KEY_NOT_FOUND",
        }
    }

    /// Message safe to return to the client
    pub fn public_message(&self) -> String {
        match self {
            AuthError::InvalidToken(_) => "Invalid token".to_string(),
            AuthError::KeyNotFound(_) => "Unknown signing key".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(self.public_message(), self.code());
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer"),
        );
        response
    }
}
