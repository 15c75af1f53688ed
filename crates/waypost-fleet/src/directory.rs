use async_trait::async_trait;
use chrono::Duration;
use thiserror::Error;

use crate::model::{ProxyServer, RevocationToken, ServerRecord};

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Fleet directory unavailable: {0}")]
    Unavailable(String),
}

/// Registry of proxy servers, keyed by proxy URL.
///
/// Registering a URL that is already present replaces the old record and
/// invalidates its revocation token.
#[async_trait]
pub trait FleetDirectory: Send + Sync {
    async fn add_server(&self, record: ServerRecord, ttl: Option<Duration>) -> Result<(), FleetError>;

    /// Public records of every live registration
    async fn servers(&self) -> Result<Vec<ProxyServer>, FleetError>;

    /// Remove the registration owning `token`. Returns whether one existed.
    async fn remove_server_by_token(&self, token: &RevocationToken) -> Result<bool, FleetError>;
}
