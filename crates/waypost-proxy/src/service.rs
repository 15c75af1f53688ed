//! Proxy node lifecycle: register, serve, keep revocations fresh, deregister

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use waypost_auth::{KeyDirectory, KeyMap, KeyProvider, KeyProviderError, RevocationRegistry};
use waypost_fleet::RevocationToken;
use waypost_http_auth::{admin_router, AdminGuard, AuthorizationGate, GateConfig};
use waypost_tunnel::TunnelEngine;

use crate::config::{ConfigError, ProxyConfig};
use crate::control_client::{ControlClient, ControlClientError};
use crate::server::proxy_router;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Control(#[from] ControlClientError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key source of a standalone proxy: nothing is ever signed by a known key.
struct NoKeys;

#[async_trait]
impl KeyProvider for NoKeys {
    async fn public_keys(&self) -> Result<KeyMap, KeyProviderError> {
        Ok(KeyMap::new())
    }
}

pub struct ProxyService {
    config: ProxyConfig,
    control: Option<Arc<ControlClient>>,
    revocations: Arc<RevocationRegistry>,
    gate: Arc<AuthorizationGate>,
    engine: Arc<TunnelEngine>,
}

impl ProxyService {
    /// Build a proxy verifying tokens against the control server's key set.
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        config.validate()?;

        let control = match &config.control {
            Some(control) => Some(Arc::new(ControlClient::new(
                control.url.clone(),
                control.shared_secret.clone(),
            )?)),
            None => None,
        };
        let provider: Arc<dyn KeyProvider> = match &control {
            Some(client) => client.clone(),
            None => Arc::new(NoKeys),
        };

        Ok(Self::assemble(config, control, provider))
    }

    /// Build a proxy with an explicit key source, e.g. an in-process authority.
    pub fn with_key_provider(
        config: ProxyConfig,
        provider: Arc<dyn KeyProvider>,
    ) -> Result<Self, ProxyError> {
        config.validate().or_else(|e| match e {
            ConfigError::NoKeySource => Ok(()),
            other => Err(other),
        })?;

        let control = match &config.control {
            Some(control) => Some(Arc::new(ControlClient::new(
                control.url.clone(),
                control.shared_secret.clone(),
            )?)),
            None => None,
        };

        Ok(Self::assemble(config, control, provider))
    }

    fn assemble(
        config: ProxyConfig,
        control: Option<Arc<ControlClient>>,
        provider: Arc<dyn KeyProvider>,
    ) -> Self {
        let revocations = Arc::new(RevocationRegistry::new());
        let directory = Arc::new(KeyDirectory::new(provider));
        let gate = Arc::new(AuthorizationGate::new(
            GateConfig {
                required: config.required_capabilities.clone(),
                allow_unsigned: config.allow_unsigned_tokens,
                ..GateConfig::default()
            },
            directory,
            revocations.clone(),
        ));
        let engine = Arc::new(TunnelEngine::new(config.tunnel.clone()));

        Self {
            config,
            control,
            revocations,
            gate,
            engine,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn revocations(&self) -> &Arc<RevocationRegistry> {
        &self.revocations
    }

    pub fn engine(&self) -> &Arc<TunnelEngine> {
        &self.engine
    }

    pub fn router(&self) -> axum::Router {
        proxy_router(self.gate.clone(), self.engine.clone())
    }

    /// Pull the control server's revocation list into the local registry.
    /// Returns how many ids were new.
    pub async fn sync_revocations(&self) -> Result<usize, ControlClientError> {
        let Some(control) = &self.control else {
            return Ok(0);
        };

        let revoked = control.revoked().await?;
        let added = self.revocations.extend(revoked);
        if added > 0 {
            info!("Synced {} newly revoked tokens", added);
        } else {
            debug!("Revocation list unchanged ({} entries)", self.revocations.len());
        }
        Ok(added)
    }

    fn spawn_revocation_sync(self: &Arc<Self>, shutdown: CancellationToken) {
        if self.control.is_none() {
            return;
        }

        let service = self.clone();
        let period = self.config.revocation_sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Revocation sync stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = service.sync_revocations().await {
                            warn!("Failed to fetch revoked tokens: {}", e);
                        }
                    }
                }
            }
        });
    }

    async fn spawn_admin_listener(&self, shutdown: CancellationToken) -> Result<(), ProxyError> {
        let Some(addr) = self.config.admin_addr else {
            return Ok(());
        };

        let guard = match &self.config.admin_secret {
            Some(secret) => AdminGuard::new(secret.clone()),
            None => AdminGuard::insecure(),
        };
        let router = admin_router(guard, self.revocations.clone());
        let listener = TcpListener::bind(addr).await?;
        info!("Admin listener on {}", listener.local_addr()?);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!("Admin listener error: {}", e);
            }
        });
        Ok(())
    }

    async fn register(&self) -> Option<RevocationToken> {
        let control = self.control.as_ref()?;
        match control.register(&self.config.server).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("Failed to register with control server: {}", e);
                None
            }
        }
    }

    async fn deregister(&self, token: Option<RevocationToken>) {
        let (Some(control), Some(token)) = (&self.control, token) else {
            return;
        };
        if let Err(e) = control.deregister(&token).await {
            warn!("Failed to deregister from control server: {}", e);
        }
    }

    /// Serve CONNECT requests on `listener` until `shutdown` fires.
    ///
    /// Established tunnels are not drained; they keep running on their own
    /// tasks after this returns.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ProxyError> {
        let registration = self.register().await;
        self.spawn_revocation_sync(shutdown.clone());
        self.spawn_admin_listener(shutdown.clone()).await?;

        info!("Proxy listening on {}", listener.local_addr()?);
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;

        shutdown.cancel();
        self.deregister(registration).await;
        served?;

        info!("Proxy stopped");
        Ok(())
    }

    /// Bind the configured address and run until Ctrl+C.
    pub async fn start(self) -> Result<(), ProxyError> {
        self.config.log_settings();
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    signal.cancel();
                }
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
        });

        Arc::new(self).run(listener, shutdown).await
    }
}
