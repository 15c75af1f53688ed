//! HTTP CONNECT tunnels
//!
//! [`TunnelEngine`] turns an authorized CONNECT request into a raw TCP relay:
//! it dials the requested `host:port`, answers 200, takes over the client
//! connection through hyper's upgrade mechanism and copies bytes both ways
//! until either side goes away.

mod engine;
mod error;
mod relay;

use axum::Router;
use std::sync::Arc;

pub use engine::{connect_handler, TunnelConfig, TunnelEngine};
pub use error::TunnelError;
pub use relay::{relay, RelayStats};

/// Router sending every request, whatever its path, to the engine.
pub fn tunnel_router(engine: Arc<TunnelEngine>) -> Router {
    Router::new().fallback(connect_handler).with_state(engine)
}
