//! Capability token gate
//!
//! Every proxied request passes [`AuthorizationGate::authorize`], which runs a
//! fixed pipeline: extract the bearer token, resolve its signing key by `kid`,
//! verify the signature, require a `jti`, check revocation, then check each
//! required capability. The first failing step decides the error.

use axum::http::{header, HeaderMap, HeaderName};
use std::sync::Arc;
use tracing::{debug, warn};
use waypost_auth::{
    Capability, KeyDirectory, KeyId, RevocationRegistry, TokenClaims, TokenId, UnverifiedToken,
};

use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Header carrying the token
    pub header: HeaderName,
    /// Expected scheme, compared case-insensitively
    pub scheme: String,
    /// Capabilities every token must grant
    pub required: Vec<Capability>,
    /// Accept `alg: none` tokens. Never enable outside development.
    pub allow_unsigned: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            header: header::PROXY_AUTHORIZATION,
            scheme: "Bearer".to_string(),
            required: vec![Capability::CONNECT_TCP],
            allow_unsigned: false,
        }
    }
}

/// A token that passed the gate, attached to the request as an extension.
#[derive(Debug, Clone)]
pub struct AuthorizedToken {
    pub jti: TokenId,
    pub kid: Option<KeyId>,
    pub claims: TokenClaims,
    /// Accepted through the unsigned bypass
    pub unsigned: bool,
}

pub struct AuthorizationGate {
    config: GateConfig,
    directory: Arc<KeyDirectory>,
    revocations: Arc<RevocationRegistry>,
}

impl AuthorizationGate {
    pub fn new(
        config: GateConfig,
        directory: Arc<KeyDirectory>,
        revocations: Arc<RevocationRegistry>,
    ) -> Self {
        if config.allow_unsigned {
            warn!("Authorization gate accepts unsigned tokens (insecure mode)");
        }
        Self {
            config,
            directory,
            revocations,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn revocations(&self) -> &Arc<RevocationRegistry> {
        &self.revocations
    }

    /// Pull the raw token out of the configured header.
    pub fn extract_token<'h>(&self, headers: &'h HeaderMap) -> Result<&'h str, AuthError> {
        let value = headers
            .get(&self.config.header)
            .ok_or(AuthError::NoAuthHeader)?
            .to_str()
            .map_err(|_| AuthError::InvalidScheme)?;

        let (scheme, token) = value.split_once(' ').ok_or(AuthError::InvalidScheme)?;
        if !scheme.eq_ignore_ascii_case(&self.config.scheme) {
            return Err(AuthError::InvalidScheme);
        }

        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::InvalidToken("empty token".to_string()));
        }
        Ok(token)
    }

    pub async fn authorize(&self, headers: &HeaderMap) -> Result<AuthorizedToken, AuthError> {
        let raw = self.extract_token(headers)?;
        let token =
            UnverifiedToken::parse(raw).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let unsigned = self.config.allow_unsigned && token.header().is_unsigned();
        let (claims, kid) = if unsigned {
            debug!("Accepting unsigned token (insecure mode)");
            let claims = token
                .unsigned_claims()
                .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
            (claims, token.key_id().cloned())
        } else {
            let kid = token
                .key_id()
                .cloned()
                .ok_or_else(|| AuthError::InvalidToken("missing kid".to_string()))?;
            let key = self
                .directory
                .resolve(&kid)
                .await
                .map_err(|e| AuthError::KeyNotFound(e.to_string()))?;
            let claims = token
                .verify(&key)
                .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
            (claims, Some(kid))
        };

        let jti = claims.jti.clone().ok_or(AuthError::MissingJti)?;
        if self.revocations.is_revoked(&jti) {
            debug!("Rejected revoked token {}", jti);
            return Err(AuthError::TokenRevoked);
        }

        if let Some(missing) = self
            .config
            .required
            .iter()
            .find(|capability| !claims.grants(capability))
        {
            return Err(AuthError::MissingPermission(missing.to_string()));
        }

        Ok(AuthorizedToken {
            jti,
            kid,
            claims,
            unsigned,
        })
    }
}
