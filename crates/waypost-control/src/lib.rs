//! Waypost control server
//!
//! Serves the authority's published keys, issues capability tokens, keeps the
//! proxy fleet registry and the revocation list.

pub mod handlers;
pub mod models;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use chrono::{Duration, Utc};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use waypost_auth::{AuthorityConfig, Capability, RevocationRegistry, TokenAuthority};
use waypost_fleet::FleetDirectory;
use waypost_http_auth::{require_admin, revoke_token, AdminGuard};

/// Application state shared across handlers
pub struct AppState {
    pub authority: Arc<TokenAuthority>,
    pub fleet: Arc<dyn FleetDirectory>,
    pub revocations: Arc<RevocationRegistry>,
    pub token_validity: Duration,
    pub token_capabilities: Vec<Capability>,
    pub server_ttl: Option<Duration>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Waypost Control API",
        version = "0.1.0",
        description = "Signing keys, capability tokens and proxy fleet registry"
    ),
    paths(
        handlers::jwks,
        handlers::health,
        handlers::issue_token,
        handlers::list_servers,
        handlers::register_server,
        handlers::remove_server,
        handlers::list_revoked,
        waypost_http_auth::revoke_token,
    ),
    components(
        schemas(
            models::Jwks,
            models::TokenResponse,
            models::ServerList,
            models::RegisterResponse,
            models::RevokedList,
            models::ErrorResponse,
            models::RevokeRequest,
            models::RevokeResponse,
            waypost_fleet::ProxyServer,
        )
    ),
    tags(
        (name = "keys", description = "Published verification keys"),
        (name = "tokens", description = "Capability token issuance"),
        (name = "fleet", description = "Proxy server registry"),
        (name = "admin", description = "Token revocation"),
        (name = "system", description = "System health")
    )
)]
pub struct ApiDoc;

/// Fatal startup problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Token validity must be positive")]
    TokenValidity,

    #[error("Signing key validity must be positive")]
    KeyValidity,

    #[error("Key grace period must not be negative")]
    GracePeriod,

    #[error("Server registration TTL must be positive")]
    ServerTtl,

    #[error("{0} is out of range")]
    OutOfRange(&'static str),

    #[error("Admin secret must not be empty")]
    EmptyAdminSecret,
}

/// Control server configuration
#[derive(Debug, Clone)]
pub struct ControlServerConfig {
    /// Address to bind the control server
    pub bind_addr: SocketAddr,
    /// Shared secret for admin routes; `None` leaves them open
    pub admin_secret: Option<String>,
    /// Lifetime of tokens from `/api/v1/token`
    pub token_validity: Duration,
    /// Capabilities granted by `/api/v1/token`
    pub token_capabilities: Vec<Capability>,
    /// Registrations expire after this long unless renewed
    pub server_ttl: Option<Duration>,
}

impl Default for ControlServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            admin_secret: None,
            token_validity: Duration::hours(1),
            token_capabilities: vec![Capability::CONNECT_TCP],
            server_ttl: None,
        }
    }
}

impl ControlServerConfig {
    /// Check this config together with the authority it will serve.
    pub fn validate(&self, authority: &AuthorityConfig) -> Result<(), ConfigError> {
        if self.admin_secret.as_deref() == Some("") {
            return Err(ConfigError::EmptyAdminSecret);
        }

        if self.token_validity <= Duration::zero() {
            return Err(ConfigError::TokenValidity);
        }
        if Utc::now().checked_add_signed(self.token_validity).is_none() {
            return Err(ConfigError::OutOfRange("token validity"));
        }

        if authority.key_validity <= Duration::zero() {
            return Err(ConfigError::KeyValidity);
        }
        if authority.grace_period < Duration::zero() {
            return Err(ConfigError::GracePeriod);
        }
        // Keys are stored for validity + grace and stamped with now + validity
        let published_for = authority
            .key_validity
            .checked_add(&authority.grace_period)
            .ok_or(ConfigError::OutOfRange("key validity plus grace period"))?;
        if Utc::now().checked_add_signed(published_for).is_none() {
            return Err(ConfigError::OutOfRange("key validity plus grace period"));
        }

        if let Some(ttl) = self.server_ttl {
            if ttl <= Duration::zero() {
                return Err(ConfigError::ServerTtl);
            }
            if Utc::now().checked_add_signed(ttl).is_none() {
                return Err(ConfigError::OutOfRange("server TTL"));
            }
        }

        Ok(())
    }
}

pub struct ControlServer {
    config: ControlServerConfig,
    state: Arc<AppState>,
    admin: AdminGuard,
}

impl ControlServer {
    pub fn new(
        config: ControlServerConfig,
        authority: Arc<TokenAuthority>,
        fleet: Arc<dyn FleetDirectory>,
        revocations: Arc<RevocationRegistry>,
    ) -> Self {
        let admin = match &config.admin_secret {
            Some(secret) => AdminGuard::new(secret.clone()),
            None => AdminGuard::insecure(),
        };
        let state = Arc::new(AppState {
            authority,
            fleet,
            revocations,
            token_validity: config.token_validity,
            token_capabilities: config.token_capabilities.clone(),
            server_ttl: config.server_ttl,
        });

        Self {
            config,
            state,
            admin,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let public_router = Router::new()
            .route("/.well-known/jwks.json", get(handlers::jwks))
            .route("/api/v1/health", get(handlers::health))
            .route("/api/v1/token", get(handlers::issue_token))
            .route("/api/v1/servers", get(handlers::list_servers))
            .route("/api/openapi.json", get(handlers::openapi))
            .with_state(self.state.clone());

        let revoke_router = Router::new()
            .route("/api/v1/revoke", post(revoke_token))
            .with_state(self.state.revocations.clone());

        let admin_router = Router::new()
            .route("/api/v1/server", post(handlers::register_server))
            .route(
                "/api/v1/server/{revocation_token}",
                delete(handlers::remove_server),
            )
            .route("/api/v1/revoked", get(handlers::list_revoked))
            .with_state(self.state.clone())
            .merge(revoke_router)
            .layer(axum_middleware::from_fn_with_state(
                self.admin.clone(),
                require_admin,
            ));

        public_router
            .merge(admin_router)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), anyhow::Error> {
        // Have a key ready before the first request
        if let Err(e) = self.state.authority.current_key().await {
            warn!("Initial signing key unavailable, will retry on demand: {}", e);
        }

        info!(
            "Issuing tokens valid for {}s granting [{}]",
            self.state.token_validity.num_seconds(),
            self.state
                .token_capabilities
                .iter()
                .map(Capability::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let router = self.build_router();
        axum::serve(listener, router)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Start the control server
    pub async fn start(self) -> Result<(), anyhow::Error> {
        info!("Starting control server on {}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }
}
