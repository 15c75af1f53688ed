//! HTTP client for the control server
//!
//! Admin calls carry `Authorization: Bearer <shared secret>`. Public calls
//! (health, server listing, key set) carry nothing.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use waypost_auth::{key_map, KeyMap, KeyProvider, KeyProviderError, PublishedKey, TokenId};
use waypost_fleet::{ProxyServer, RevocationToken};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ControlClientError {
    #[error("Control server request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Control server returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Deserialize)]
struct ServersResponse {
    servers: Vec<ProxyServer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    revocation_token: RevocationToken,
}

#[derive(Deserialize)]
struct RevokedResponse {
    revoked: Vec<TokenId>,
}

#[derive(Deserialize)]
struct JwksResponse {
    keys: Vec<PublishedKey>,
}

pub struct ControlClient {
    base_url: String,
    shared_secret: String,
    http: Client,
}

impl ControlClient {
    pub fn new(
        base_url: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Result<Self, ControlClientError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shared_secret: shared_secret.into(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.shared_secret)
    }

    /// Whether the control server answers its health probe
    pub async fn alive(&self) -> bool {
        match self.http.get(self.url("/api/v1/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Control server health check failed: {}", e);
                false
            }
        }
    }

    pub async fn servers(&self) -> Result<Vec<ProxyServer>, ControlClientError> {
        let response = self.http.get(self.url("/api/v1/servers")).send().await?;
        let body: ServersResponse = ensure_success(response).await?.json().await?;
        Ok(body.servers)
    }

    /// Register `server`; the returned token is the only way to remove it again.
    pub async fn register(
        &self,
        server: &ProxyServer,
    ) -> Result<RevocationToken, ControlClientError> {
        let response = self
            .http
            .post(self.url("/api/v1/server"))
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .json(server)
            .send()
            .await?;
        let body: RegisterResponse = ensure_success(response).await?.json().await?;

        info!("Registered {} with control server", server.proxy_url);
        Ok(body.revocation_token)
    }

    pub async fn deregister(&self, token: &RevocationToken) -> Result<(), ControlClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/server/{}", token.as_str())))
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        ensure_success(response).await?;

        info!("Deregistered from control server");
        Ok(())
    }

    /// Every token id the control server has revoked
    pub async fn revoked(&self) -> Result<Vec<TokenId>, ControlClientError> {
        let response = self
            .http
            .get(self.url("/api/v1/revoked"))
            .header(reqwest::header::AUTHORIZATION, self.bearer())
            .send()
            .await?;
        let body: RevokedResponse = ensure_success(response).await?.json().await?;
        Ok(body.revoked)
    }

    /// The published key set, undecoded
    pub async fn published_keys(&self) -> Result<Vec<PublishedKey>, ControlClientError> {
        let response = self
            .http
            .get(self.url("/.well-known/jwks.json"))
            .send()
            .await?;
        let body: JwksResponse = ensure_success(response).await?.json().await?;
        Ok(body.keys)
    }
}

async fn ensure_success(response: Response) -> Result<Response, ControlClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ControlClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl KeyProvider for ControlClient {
    async fn public_keys(&self) -> Result<KeyMap, KeyProviderError> {
        let keys = self.published_keys().await.map_err(|e| match e {
            ControlClientError::Request(e) if e.is_decode() => {
                KeyProviderError::InvalidResponse(e.to_string())
            }
            other => KeyProviderError::Unavailable(other.to_string()),
        })?;

        debug!("Fetched {} published keys from {}", keys.len(), self.base_url);
        Ok(key_map(keys))
    }
}
