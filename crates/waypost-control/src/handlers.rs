use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{debug, error, warn};
use utoipa::OpenApi;
use waypost_fleet::{ProxyServer, RevocationToken, ServerRecord};

use crate::models::*;
use crate::{ApiDoc, AppState};

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal(message: &str, code: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(message, code)),
    )
}

/// Published verification keys, including retired keys still in their grace period
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    responses(
        (status = 200, description = "Key set", body = Jwks),
        (status = 404, description = "No keys published", body = ErrorResponse),
        (status = 500, description = "Key store failure", body = ErrorResponse)
    ),
    tag = "keys"
)]
pub async fn jwks(State(state): State<Arc<AppState>>) -> Result<Json<Jwks>, ApiError> {
    let keys = state.authority.publishable_keys().await.map_err(|e| {
        error!("Failed to list signing keys: {}", e);
        internal("Failed to retrieve signing keys", "KEY_STORE_ERROR")
    })?;

    if keys.is_empty() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("No signing keys found", "NO_KEYS")),
        ));
    }

    debug!("Serving {} published keys", keys.len());
    Ok(Json(Jwks { keys }))
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses((status = 200, description = "Service is up", body = String)),
    tag = "system"
)]
pub async fn health() -> &'static str {
    "OK"
}

/// Issue a short-lived capability token
#[utoipa::path(
    get,
    path = "/api/v1/token",
    responses(
        (status = 200, description = "Signed token", body = TokenResponse),
        (status = 500, description = "Key rotation or signing failed", body = ErrorResponse)
    ),
    tag = "tokens"
)]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = state
        .authority
        .issue_token(state.token_validity, &state.token_capabilities)
        .await
        .map_err(|e| {
            error!("Failed to issue token: {}", e);
            internal("Failed to sign token", "SIGNING_FAILED")
        })?;

    Ok(Json(TokenResponse { token }))
}

/// Public fleet listing
#[utoipa::path(
    get,
    path = "/api/v1/servers",
    responses(
        (status = 200, description = "Registered proxy servers", body = ServerList),
        (status = 500, description = "Directory failure", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ServerList>, ApiError> {
    let servers = state.fleet.servers().await.map_err(|e| {
        error!("Failed to list servers: {}", e);
        internal("Failed to retrieve servers", "DIRECTORY_ERROR")
    })?;

    Ok(Json(ServerList { servers }))
}

/// Register a proxy server
#[utoipa::path(
    post,
    path = "/api/v1/server",
    request_body = ProxyServer,
    responses(
        (status = 200, description = "Registered", body = RegisterResponse),
        (status = 400, description = "Invalid registration", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin secret", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn register_server(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ProxyServer>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(server) = payload.map_err(|e| {
        debug!("Rejected registration body: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("Invalid request payload", "INVALID_BODY")),
        )
    })?;

    server.validate().map_err(|e| {
        warn!("Rejected registration of {:?}: {}", server.proxy_url, e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string(), "INVALID_SERVER")),
        )
    })?;

    let record = ServerRecord::new(server);
    let revocation_token = record.revocation_token.clone();
    state
        .fleet
        .add_server(record, state.server_ttl)
        .await
        .map_err(|e| {
            error!("Failed to add server: {}", e);
            internal("Failed to add server", "DIRECTORY_ERROR")
        })?;

    Ok(Json(RegisterResponse { revocation_token }))
}

/// Remove the registration owning a revocation token
#[utoipa::path(
    delete,
    path = "/api/v1/server/{revocation_token}",
    params(("revocation_token" = String, Path, description = "Token returned at registration")),
    responses(
        (status = 200, description = "Removed"),
        (status = 404, description = "Unknown token", body = ErrorResponse),
        (status = 401, description = "Missing or wrong admin secret", body = ErrorResponse)
    ),
    tag = "fleet"
)]
pub async fn remove_server(
    State(state): State<Arc<AppState>>,
    Path(revocation_token): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .fleet
        .remove_server_by_token(&RevocationToken::from(revocation_token))
        .await
        .map_err(|e| {
            error!("Failed to remove server: {}", e);
            internal("Failed to remove server", "DIRECTORY_ERROR")
        })?;

    if removed {
        Ok(StatusCode::OK)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Server not found", "NOT_FOUND")),
        ))
    }
}

/// Every revoked token id, for proxies to mirror
#[utoipa::path(
    get,
    path = "/api/v1/revoked",
    responses(
        (status = 200, description = "Revoked token ids", body = RevokedList),
        (status = 401, description = "Missing or wrong admin secret", body = ErrorResponse)
    ),
    tag = "admin"
)]
pub async fn list_revoked(State(state): State<Arc<AppState>>) -> Json<RevokedList> {
    let revoked = state
        .revocations
        .snapshot()
        .into_iter()
        .map(|jti| jti.to_string())
        .collect();
    Json(RevokedList { revoked })
}

/// The OpenAPI document of this server
pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
