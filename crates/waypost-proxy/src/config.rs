//! Proxy node configuration

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use waypost_auth::Capability;
use waypost_fleet::{ProxyServer, ValidationError};
use waypost_tunnel::TunnelConfig;

/// Fatal startup problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Control server URL must use https:// unless insecure mode is enabled: {0}")]
    InsecureControlUrl(String),

    #[error("Control server URL is not a valid URL: {0}")]
    InvalidControlUrl(String),

    #[error("Control server shared secret must not be empty")]
    EmptySharedSecret,

    #[error("Admin listener requires an admin secret unless insecure mode is enabled")]
    AdminSecretRequired,

    #[error("Admin secret must not be empty")]
    EmptyAdminSecret,

    #[error("No control server configured; tokens could never be verified")]
    NoKeySource,

    #[error("Revocation sync interval must be greater than zero")]
    InvalidSyncInterval,

    #[error("Invalid registration record: {0}")]
    InvalidServer(#[from] ValidationError),
}

/// Where the proxy fetches keys, registers itself and pulls revocations from.
#[derive(Clone)]
pub struct ControlConfig {
    pub url: String,
    pub shared_secret: String,
}

impl std::fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConfig")
            .field("url", &self.url)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the CONNECT listener binds
    pub listen_addr: SocketAddr,
    /// Control server; `None` runs standalone
    pub control: Option<ControlConfig>,
    /// Record published to the fleet listing
    pub server: ProxyServer,
    /// Optional local listener exposing `POST /revoke`
    pub admin_addr: Option<SocketAddr>,
    pub admin_secret: Option<String>,
    /// Allow a plain-http control server and an unauthenticated admin listener
    pub insecure: bool,
    /// Accept `alg: none` tokens at the gate
    pub allow_unsigned_tokens: bool,
    /// Capabilities every tunnel request must carry
    pub required_capabilities: Vec<Capability>,
    /// How often the revocation list is pulled from the control server
    pub revocation_sync_interval: Duration,
    pub tunnel: TunnelConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8443)),
            control: None,
            server: ProxyServer {
                proxy_url: "https://proxy.example.com".to_string(),
                latitude: 0.0,
                longitude: 0.0,
                city: "Unknown".to_string(),
                country: "Unknown".to_string(),
                supports_connect_tcp: true,
                supports_connect_udp: false,
                supports_connect_ip: false,
            },
            admin_addr: None,
            admin_secret: None,
            insecure: false,
            allow_unsigned_tokens: false,
            required_capabilities: vec![Capability::CONNECT_TCP],
            revocation_sync_interval: Duration::from_secs(30 * 60),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.control {
            Some(control) => {
                let scheme = control
                    .url
                    .split_once("://")
                    .map(|(scheme, _)| scheme)
                    .ok_or_else(|| ConfigError::InvalidControlUrl(control.url.clone()))?;
                match scheme {
                    "https" => {}
                    "http" if self.insecure => {}
                    "http" => return Err(ConfigError::InsecureControlUrl(control.url.clone())),
                    _ => return Err(ConfigError::InvalidControlUrl(control.url.clone())),
                }
                if control.shared_secret.is_empty() {
                    return Err(ConfigError::EmptySharedSecret);
                }
                if self.revocation_sync_interval.is_zero() {
                    return Err(ConfigError::InvalidSyncInterval);
                }
                self.server.validate()?;
            }
            None if !self.allow_unsigned_tokens => return Err(ConfigError::NoKeySource),
            None => {}
        }

        if self.admin_addr.is_some() {
            match self.admin_secret.as_deref() {
                Some("") => return Err(ConfigError::EmptyAdminSecret),
                None if !self.insecure => return Err(ConfigError::AdminSecretRequired),
                _ => {}
            }
        }

        Ok(())
    }

    pub fn log_settings(&self) {
        info!("Proxy listen address: {}", self.listen_addr);
        match &self.control {
            Some(control) => {
                info!("Control server: {}", control.url);
                info!(
                    "Revocation sync every {}s",
                    self.revocation_sync_interval.as_secs()
                );
            }
            None => warn!("Control server integration disabled"),
        }
        info!(
            "Location: {}, {} ({:.4}, {:.4})",
            self.server.city, self.server.country, self.server.latitude, self.server.longitude
        );
        info!(
            "Capabilities: TCP={}, UDP={}, IP={}",
            self.server.supports_connect_tcp,
            self.server.supports_connect_udp,
            self.server.supports_connect_ip
        );
        if let Some(addr) = self.admin_addr {
            info!("Admin listener: {}", addr);
        }
        if self.insecure {
            warn!("Insecure mode enabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_control(url: &str) -> ProxyConfig {
        ProxyConfig {
            control: Some(ControlConfig {
                url: url.to_string(),
                shared_secret: "secret".to_string(),
            }),
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn test_https_control_url_accepted() {
        assert!(with_control("https://control.example").validate().is_ok());
    }

    #[test]
    fn test_plain_http_requires_insecure() {
        let config = with_control("http://control.example");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InsecureControlUrl(_))
        ));

        let config = ProxyConfig {
            insecure: true,
            ..with_control("http://control.example")
        };
        assert!(config.validate().is_ok());

        assert!(matches!(
            with_control("control.example").validate(),
            Err(ConfigError::InvalidControlUrl(_))
        ));
    }

    #[test]
    fn test_empty_shared_secret_rejected() {
        let mut config = with_control("https://control.example");
        if let Some(control) = config.control.as_mut() {
            control.shared_secret.clear();
        }
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptySharedSecret)
        ));
    }

    #[test]
    fn test_standalone_needs_unsigned_tokens() {
        assert!(matches!(
            ProxyConfig::default().validate(),
            Err(ConfigError::NoKeySource)
        ));

        let config = ProxyConfig {
            allow_unsigned_tokens: true,
            ..ProxyConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_admin_listener_secret() {
        let mut config = with_control("https://control.example");
        config.admin_addr = Some(SocketAddr::from(([127, 0, 0, 1], 9090)));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AdminSecretRequired)
        ));

        config.admin_secret = Some(String::new());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyAdminSecret)
        ));

        config.admin_secret = Some("admin".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sync_interval_rejected() {
        let config = ProxyConfig {
            revocation_sync_interval: Duration::ZERO,
            ..with_control("https://control.example")
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSyncInterval)
        ));

        let config = ProxyConfig {
            revocation_sync_interval: Duration::from_secs(1),
            ..with_control("https://control.example")
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_registration_record() {
        let mut config = with_control("https://control.example");
        config.server.supports_connect_tcp = false;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServer(ValidationError::NoConnectSupport))
        ));
    }
}
