use axum::{middleware, Router};
use std::sync::Arc;
use waypost_http_auth::{require_token, AuthorizationGate};
use waypost_tunnel::{tunnel_router, TunnelEngine};

/// Every request passes the gate before it reaches the tunnel engine.
pub fn proxy_router(gate: Arc<AuthorizationGate>, engine: Arc<TunnelEngine>) -> Router {
    tunnel_router(engine).layer(middleware::from_fn_with_state(gate, require_token))
}
