//! In-process fleet directory and key store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};
use waypost_auth::{KeyId, KeyStore, KeyStoreError, PublishedKey};

use crate::directory::{FleetDirectory, FleetError};
use crate::model::{ProxyServer, RevocationToken, ServerRecord};

struct Entry<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Utc::now() + ttl),
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Keeps server records and published keys in memory, dropping entries once
/// their TTL runs out.
#[derive(Default)]
pub struct MemoryFleetDirectory {
    servers: Mutex<HashMap<String, Entry<ServerRecord>>>,
    keys: Mutex<HashMap<KeyId, Entry<PublishedKey>>>,
}

impl MemoryFleetDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FleetDirectory for MemoryFleetDirectory {
    async fn add_server(&self, record: ServerRecord, ttl: Option<Duration>) -> Result<(), FleetError> {
        let url = record.server.proxy_url.clone();
        let replaced = self
            .servers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone(), Entry::new(record, ttl))
            .is_some();

        if replaced {
            info!("Re-registered proxy server {}", url);
        } else {
            info!("Registered proxy server {}", url);
        }
        Ok(())
    }

    async fn servers(&self) -> Result<Vec<ProxyServer>, FleetError> {
        let now = Utc::now();
        let mut servers = self.servers.lock().unwrap_or_else(PoisonError::into_inner);
        servers.retain(|_, entry| entry.is_live(now));

        let mut listing: Vec<ProxyServer> =
            servers.values().map(|entry| entry.value.server.clone()).collect();
        listing.sort_by(|a, b| a.proxy_url.cmp(&b.proxy_url));
        Ok(listing)
    }

    async fn remove_server_by_token(&self, token: &RevocationToken) -> Result<bool, FleetError> {
        let mut servers = self.servers.lock().unwrap_or_else(PoisonError::into_inner);
        let url = servers
            .iter()
            .find(|(_, entry)| &entry.value.revocation_token == token)
            .map(|(url, _)| url.clone());

        match url {
            Some(url) => {
                servers.remove(&url);
                info!("Removed proxy server {}", url);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryFleetDirectory {
    async fn put_key(&self, key: PublishedKey, ttl: Duration) -> Result<(), KeyStoreError> {
        if ttl <= Duration::zero() {
            return Err(KeyStoreError::Rejected(format!(
                "key {} would expire immediately",
                key.kid
            )));
        }

        debug!("Storing key {} for {}s", key.kid, ttl.num_seconds());
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.kid.clone(), Entry::new(key, Some(ttl)));
        Ok(())
    }

    async fn active_keys(&self) -> Result<Vec<PublishedKey>, KeyStoreError> {
        let now = Utc::now();
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.retain(|_, entry| entry.is_live(now));
        Ok(keys.values().map(|entry| entry.value.clone()).collect())
    }
}
