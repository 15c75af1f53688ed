//! Waypost proxy node
//!
//! A proxy accepts CONNECT requests, checks the capability token in
//! `Proxy-Authorization` against keys published by the control server, and
//! relays authorized tunnels. It registers itself in the control server's
//! fleet listing on startup, mirrors the control server's revocation list
//! periodically, and removes its registration on shutdown.

pub mod config;
pub mod control_client;
pub mod server;
pub mod service;

pub use config::{ConfigError, ControlConfig, ProxyConfig};
pub use control_client::{ControlClient, ControlClientError};
pub use server::proxy_router;
pub use service::{ProxyError, ProxyService};
