//! Client-side cache of verification keys, refreshed in bulk on a miss.

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::ids::KeyId;
use crate::keys::PublishedKey;
use crate::versioned::Versioned;

pub type KeyMap = HashMap<KeyId, DecodingKey>;

#[derive(Debug, Error)]
pub enum KeyProviderError {
    #[error("Key source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid key set: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No key with id {0}")]
    KeyNotFound(KeyId),

    #[error(transparent)]
    Provider(#[from] KeyProviderError),
}

/// Source of the full current set of verification keys.
#[async_trait]
pub trait KeyProvider: Send + Sync {
    async fn public_keys(&self) -> Result<KeyMap, KeyProviderError>;
}

/// Decode a published key set, dropping entries that cannot be used.
pub fn key_map(published: impl IntoIterator<Item = PublishedKey>) -> KeyMap {
    published
        .into_iter()
        .filter_map(|key| match key.decoding_key() {
            Ok(decoding) => Some((key.kid, decoding)),
            Err(e) => {
                warn!("Skipping published key {}: {}", key.kid, e);
                None
            }
        })
        .collect()
}

pub struct KeyDirectory {
    provider: Arc<dyn KeyProvider>,
    cache: RwLock<Versioned<KeyMap>>,
}

impl KeyDirectory {
    pub fn new(provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(Versioned::default()),
        }
    }

    /// Look up the key for `kid`, refreshing the whole cache once on a miss.
    pub async fn resolve(&self, kid: &KeyId) -> Result<DecodingKey, ResolveError> {
        let seen = {
            let cache = self.cache.read().await;
            if let Some(key) = cache.get().get(kid) {
                return Ok(key.clone());
            }
            cache.generation()
        };

        let mut cache = self.cache.write().await;
        if let Some(key) = cache.get().get(kid) {
            return Ok(key.clone());
        }
        if cache.changed_since(seen) {
            // Someone refreshed while we waited for the lock
            debug!("Key {} absent from freshly refreshed set", kid);
            return Err(ResolveError::KeyNotFound(kid.clone()));
        }

        debug!("Key {} not cached, refreshing key set", kid);
        let keys = self.provider.public_keys().await?;
        debug!("Fetched {} verification keys", keys.len());
        cache.replace(keys);

        cache
            .get()
            .get(kid)
            .cloned()
            .ok_or_else(|| ResolveError::KeyNotFound(kid.clone()))
    }

    pub async fn cached_key_count(&self) -> usize {
        self.cache.read().await.get().len()
    }
}
