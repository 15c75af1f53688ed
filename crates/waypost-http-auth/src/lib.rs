//! HTTP authorization for waypost
//!
//! Two independent credentials are handled here:
//!
//! - **Capability tokens** in `Proxy-Authorization: Bearer <jwt>`, checked by
//!   [`AuthorizationGate`] and the [`require_token`] middleware on every
//!   proxied request.
//! - **Admin secret** in `Authorization: Bearer <secret>`, checked by
//!   [`AdminGuard`] and the [`require_admin`] middleware on admin routes.
//!
//! # Usage
//!
//! ```ignore
//! use axum::{middleware, Router};
//! use waypost_http_auth::{require_token, AuthorizationGate, GateConfig};
//!
//! let gate = Arc::new(AuthorizationGate::new(GateConfig::default(), directory, revocations));
//! let app = Router::new()
//!     .fallback(handler)
//!     .layer(middleware::from_fn_with_state(gate, require_token));
//! ```

mod admin;
mod error;
mod gate;
mod middleware;

pub use admin::{
    admin_router, require_admin, revoke_token, AdminError, AdminGuard, RevokeRequest,
    RevokeResponse,
};
pub use error::{AuthError, ErrorResponse};
pub use gate::{AuthorizationGate, AuthorizedToken, GateConfig};
pub use middleware::require_token;

// utoipa's generated path type, needed by routers documenting `revoke_token`
pub use admin::__path_revoke_token;
