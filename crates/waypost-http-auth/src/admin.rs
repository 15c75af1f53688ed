//! Shared-secret admin authentication and the token revocation route
//!
//! Admin callers present `Authorization: Bearer <secret>`. This is a separate
//! header from the `Proxy-Authorization` capability token so an admin
//! credential can never be mistaken for, or forwarded as, an end-user token.

use axum::{
    extract::{rejection::JsonRejection, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use waypost_auth::{RevocationRegistry, TokenId};

use crate::error::ErrorResponse;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Unauthorized")]
    MissingHeader,

    #[error("Invalid authorization format")]
    InvalidFormat,

    #[error("Unauthorized")]
    WrongSecret,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let code = match self {
            AdminError::MissingHeader => "MISSING_AUTH",
            AdminError::InvalidFormat => "INVALID_AUTH_FORMAT",
            AdminError::WrongSecret => "INVALID_ADMIN_SECRET",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(self.to_string(), code)),
        )
            .into_response()
    }
}

/// Checks the admin shared secret. Without a secret every caller is admitted.
#[derive(Clone)]
pub struct AdminGuard {
    secret: Option<Arc<str>>,
}

impl AdminGuard {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(Arc::from(secret.into())),
        }
    }

    pub fn insecure() -> Self {
        warn!("Admin routes are unauthenticated (insecure mode)");
        Self { secret: None }
    }

    pub fn is_insecure(&self) -> bool {
        self.secret.is_none()
    }

    pub fn check(&self, headers: &HeaderMap) -> Result<(), AdminError> {
        let Some(secret) = self.secret.as_deref() else {
            return Ok(());
        };

        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AdminError::MissingHeader)?
            .to_str()
            .map_err(|_| AdminError::InvalidFormat)?;
        let presented = value
            .strip_prefix("Bearer ")
            .ok_or(AdminError::InvalidFormat)?;

        if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
            Ok(())
        } else {
            Err(AdminError::WrongSecret)
        }
    }
}

impl fmt::Debug for AdminGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminGuard")
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub async fn require_admin(
    State(guard): State<AdminGuard>,
    request: Request,
    next: Next,
) -> Response {
    match guard.check(request.headers()) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            debug!("Rejected admin request to {}: {:?}", request.uri(), e);
            e.into_response()
        }
    }
}

/// Revocation request body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokeRequest {
    /// Token id to revoke, as a string or integer
    #[serde(default, deserialize_with = "lenient_token_id")]
    #[schema(value_type = Option<String>)]
    pub jti: Option<TokenId>,
}

fn lenient_token_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TokenId>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokeResponse {
    pub status: String,
    pub message: String,
}

/// Revoke a token by its `jti`
#[utoipa::path(
    post,
    path = "/api/v1/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Token revoked", body = RevokeResponse),
        (status = 400, description = "Missing jti or invalid body", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin secret", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn revoke_token(
    State(registry): State<Arc<RevocationRegistry>>,
    payload: Result<Json<RevokeRequest>, JsonRejection>,
) -> Result<Json<RevokeResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Json(request) = payload.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                format!("Invalid JSON payload: {}", e.body_text()),
                "INVALID_BODY",
            )),
        )
    })?;

    let jti = request.jti.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Missing jti field", "MISSING_JTI")),
        )
    })?;

    if !registry.revoke(jti.clone()) {
        info!("Token {} was already revoked", jti);
    }

    Ok(Json(RevokeResponse {
        status: "success".to_string(),
        message: "Token revoked".to_string(),
    }))
}

/// Standalone admin surface: `POST /revoke` behind the admin guard.
pub fn admin_router(guard: AdminGuard, registry: Arc<RevocationRegistry>) -> Router {
    Router::new()
        .route("/revoke", post(revoke_token))
        .route_layer(middleware::from_fn_with_state(guard, require_admin))
        .with_state(registry)
}
