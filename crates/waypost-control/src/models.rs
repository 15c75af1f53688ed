use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use waypost_auth::PublishedKey;
use waypost_fleet::{ProxyServer, RevocationToken};

pub use waypost_http_auth::{ErrorResponse, RevokeRequest, RevokeResponse};

/// Published verification keys
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Jwks {
    /// `{kty, k, kid, expiresAt}` entries; `k` is base64 DER SubjectPublicKeyInfo
    #[schema(value_type = Vec<Object>)]
    pub keys: Vec<PublishedKey>,
}

/// A freshly issued capability token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

/// Fleet listing
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServerList {
    pub servers: Vec<ProxyServer>,
}

/// Returned once, on registration
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[schema(value_type = String)]
    pub revocation_token: RevocationToken,
}

/// Every revoked token id
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokedList {
    pub revoked: Vec<String>,
}
