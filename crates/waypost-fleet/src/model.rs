//! Proxy server registration records

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

/// Why a registration was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxyUrl is required")]
    MissingProxyUrl,

    #[error("latitude must be between -90 and 90")]
    LatitudeOutOfRange,

    #[error("longitude must be between -180 and 180")]
    LongitudeOutOfRange,

    #[error("city is required")]
    MissingCity,

    #[error("country is required")]
    MissingCountry,

    #[error("at least one connection type must be supported")]
    NoConnectSupport,
}

/// A proxy server as published in the fleet listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyServer {
    /// Full URI of the endpoint accepting CONNECT requests
    #[serde(default)]
    pub proxy_url: String,
    /// Decimal degrees
    #[serde(default)]
    pub latitude: f64,
    /// Decimal degrees
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub city: String,
    /// ISO 3166 country code
    #[serde(default)]
    pub country: String,
    /// CONNECT to TCP targets (RFC 9110)
    #[serde(default)]
    pub supports_connect_tcp: bool,
    /// CONNECT-UDP (RFC 9298)
    #[serde(default)]
    pub supports_connect_udp: bool,
    /// CONNECT-IP (RFC 9484)
    #[serde(default)]
    pub supports_connect_ip: bool,
}

impl ProxyServer {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.proxy_url.is_empty() {
            return Err(ValidationError::MissingProxyUrl);
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::LatitudeOutOfRange);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::LongitudeOutOfRange);
        }
        if self.city.is_empty() {
            return Err(ValidationError::MissingCity);
        }
        if self.country.is_empty() {
            return Err(ValidationError::MissingCountry);
        }
        if !(self.supports_connect_tcp || self.supports_connect_udp || self.supports_connect_ip) {
            return Err(ValidationError::NoConnectSupport);
        }
        Ok(())
    }
}

/// Secret handed to a proxy at registration; presenting it removes the entry.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevocationToken(String);

impl RevocationToken {
    /// 32 random bytes, URL-safe base64
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RevocationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for RevocationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RevocationToken(<redacted>)")
    }
}

/// What the directory stores: the public record plus its private removal token.
///
/// Only [`ProxyServer`] is serializable, so listings cannot leak the token.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub server: ProxyServer,
    pub revocation_token: RevocationToken,
}

impl ServerRecord {
    pub fn new(server: ProxyServer) -> Self {
        Self {
            server,
            revocation_token: RevocationToken::generate(),
        }
    }
}
