//! Signing keys, capability tokens and revocation for waypost
//!
//! The control server owns a [`TokenAuthority`], which keeps one live RSA
//! signing key, rotates it when it expires and issues RS256 tokens carrying
//! capability claims. Proxies verify those tokens through a [`KeyDirectory`]
//! that caches the authority's published keys, and consult a
//! [`RevocationRegistry`] for tokens revoked by `jti`.

pub mod authority;
pub mod claims;
pub mod directory;
pub mod ids;
pub mod jwt;
pub mod keys;
pub mod revocation;
pub mod versioned;

pub use authority::{AuthorityConfig, AuthorityError, KeyStore, KeyStoreError, TokenAuthority};
pub use claims::{Capability, TokenClaims};
pub use directory::{key_map, KeyDirectory, KeyMap, KeyProvider, KeyProviderError, ResolveError};
pub use ids::{KeyId, TokenId};
pub use jwt::{encode_unsigned, TokenError, TokenHeader, UnverifiedToken};
pub use keys::{KeyError, PublishedKey, SigningKey};
pub use revocation::RevocationRegistry;
pub use versioned::Versioned;

// Re-export so dependents can name verification keys without their own
// jsonwebtoken dependency.
pub use jsonwebtoken::DecodingKey;
