use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use waypost_http_auth::ErrorResponse;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Failed to connect to {target}: {reason}")]
    DialFailure { target: String, reason: String },

    #[error("Connection cannot be taken over")]
    UpgradeUnsupported,
}

impl TunnelError {
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            TunnelError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TunnelError::DialFailure { .. } => StatusCode::BAD_GATEWAY,
            TunnelError::UpgradeUnsupported => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            TunnelError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            TunnelError::BadRequest(_) => "BAD_REQUEST",
            TunnelError::DialFailure { .. } => "DIAL_FAILED",
            TunnelError::UpgradeUnsupported => "UPGRADE_UNSUPPORTED",
        }
    }
}

impl IntoResponse for TunnelError {
    fn into_response(self) -> Response {
        // Dial details stay in the logs
        let message = match &self {
            TunnelError::DialFailure { .. } => "Failed to connect to target".to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(ErrorResponse::new(message, self.code()))).into_response()
    }
}
