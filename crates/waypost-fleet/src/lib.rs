//! Proxy fleet registry for the waypost control server
//!
//! Proxies register themselves with a [`ProxyServer`] record and receive a
//! [`RevocationToken`] that later removes the registration. The same store
//! also holds the authority's published signing keys, so
//! [`MemoryFleetDirectory`] implements both [`FleetDirectory`] and
//! [`waypost_auth::KeyStore`].

mod directory;
mod memory;
mod model;

pub use directory::{FleetDirectory, FleetError};
pub use memory::MemoryFleetDirectory;
pub use model::{ProxyServer, RevocationToken, ServerRecord, ValidationError};
