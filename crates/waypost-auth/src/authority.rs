//! Token authority: owns the signing key, rotates it, issues tokens

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::claims::{Capability, TokenClaims};
use crate::directory::{key_map, KeyMap, KeyProvider, KeyProviderError};
use crate::jwt::TokenError;
use crate::keys::{KeyError, PublishedKey, SigningKey};
use crate::versioned::Versioned;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key store unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected key record: {0}")]
    Rejected(String),
}

/// Durable home of published keys. Records expire after their TTL.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn put_key(&self, key: PublishedKey, ttl: Duration) -> Result<(), KeyStoreError>;

    /// Every key whose record has not yet expired out of the store.
    async fn active_keys(&self) -> Result<Vec<PublishedKey>, KeyStoreError>;
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Store(#[from] KeyStoreError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// `iss` claim of issued tokens
    pub issuer: String,
    /// How long a signing key is used before rotation
    pub key_validity: Duration,
    /// How long a retired key stays published after it stops signing
    pub grace_period: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            issuer: "waypost-control".to_string(),
            key_validity: Duration::hours(24),
            grace_period: Duration::hours(25),
        }
    }
}

pub struct TokenAuthority {
    config: AuthorityConfig,
    store: Arc<dyn KeyStore>,
    current: RwLock<Versioned<Option<Arc<SigningKey>>>>,
}

impl TokenAuthority {
    pub fn new(config: AuthorityConfig, store: Arc<dyn KeyStore>) -> Self {
        Self {
            config,
            store,
            current: RwLock::new(Versioned::default()),
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// The live signing key, rotating it first if it has expired.
    ///
    /// A failed rotation leaves the slot untouched, so the next caller simply
    /// tries again.
    pub async fn current_key(&self) -> Result<Arc<SigningKey>, AuthorityError> {
        let seen = {
            let current = self.current.read().await;
            if let Some(key) = live(current.get()) {
                return Ok(key);
            }
            current.generation()
        };

        let mut current = self.current.write().await;
        if current.changed_since(seen) {
            if let Some(key) = live(current.get()) {
                debug!(
                    "Signing key rotated concurrently (generation {} -> {})",
                    seen,
                    current.generation()
                );
                return Ok(key);
            }
        }

        let key = SigningKey::generate(self.config.key_validity).await?;
        self.store
            .put_key(
                key.published(),
                self.config.key_validity + self.config.grace_period,
            )
            .await
            .inspect_err(|e| warn!("Failed to persist signing key {}: {}", key.kid(), e))?;

        info!(
            "Rotated signing key, new kid {} valid until {}",
            key.kid(),
            key.expires_at()
        );
        let key = Arc::new(key);
        current.replace(Some(key.clone()));
        Ok(key)
    }

    /// Sign a token granting `capabilities`, valid for `valid_for`.
    pub async fn issue_token(
        &self,
        valid_for: Duration,
        capabilities: &[Capability],
    ) -> Result<String, AuthorityError> {
        let key = self.current_key().await?;
        let claims = TokenClaims::new(self.config.issuer.clone(), valid_for)
            .with_capabilities(capabilities);

        Ok(key.sign(claims)?)
    }

    /// Every public key still published, including retired keys in their
    /// grace period.
    pub async fn publishable_keys(&self) -> Result<Vec<PublishedKey>, AuthorityError> {
        self.current_key().await?;
        let mut keys = self.store.active_keys().await?;
        keys.sort_by(|a, b| a.kid.cmp(&b.kid));
        Ok(keys)
    }
}

fn live(slot: &Option<Arc<SigningKey>>) -> Option<Arc<SigningKey>> {
    slot.as_ref().filter(|key| !key.is_expired()).cloned()
}

#[async_trait]
impl KeyProvider for TokenAuthority {
    async fn public_keys(&self) -> Result<KeyMap, KeyProviderError> {
        let keys = self
            .publishable_keys()
            .await
            .map_err(|e| KeyProviderError::Unavailable(e.to_string()))?;
        Ok(key_map(keys))
    }
}
