//! Revoked token registry

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};
use tracing::info;

use crate::ids::TokenId;

/// Set of revoked token ids, consulted on every authorized request.
///
/// Entries never expire. The lock is a plain `std` lock: it is never held
/// across an await and lookups are O(1).
#[derive(Debug, Default)]
pub struct RevocationRegistry {
    revoked: RwLock<HashSet<TokenId>>,
}

impl RevocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke `jti`. Returns `true` when it was not revoked before.
    pub fn revoke(&self, jti: TokenId) -> bool {
        let mut revoked = self.revoked.write().unwrap_or_else(PoisonError::into_inner);
        let added = revoked.insert(jti.clone());
        if added {
            info!("Revoked token {}", jti);
        }
        added
    }

    pub fn is_revoked(&self, jti: &TokenId) -> bool {
        self.revoked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(jti)
    }

    /// Add many ids at once. Returns how many were new.
    pub fn extend(&self, ids: impl IntoIterator<Item = TokenId>) -> usize {
        let mut revoked = self.revoked.write().unwrap_or_else(PoisonError::into_inner);
        ids.into_iter().filter(|id| revoked.insert(id.clone())).count()
    }

    /// Sorted copy of every revoked id.
    pub fn snapshot(&self) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = self
            .revoked
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.revoked.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
