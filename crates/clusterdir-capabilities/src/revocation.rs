//! Revocation hook.
//!
//! Verification asks a [`RevocationCheck`] as its last step. The default
//! [`NeverRevoked`] keeps the bearer-token model; [`MemoryRevocationList`]
//! and [`CachedRevocationCheck`] are there for deployments that need to kill
//! tokens before they expire.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::error::{CapabilityError, CapabilityResult};
use crate::token::TokenId;

/// Answers "has this token been revoked?".
#[async_trait]
pub trait RevocationCheck: Send + Sync {
    /// Whether `token` is revoked. Errors deny the request.
    async fn is_revoked(&self, token: &TokenId) -> CapabilityResult<bool>;
}

/// Nothing is ever revoked.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRevoked;

#[async_trait]
impl RevocationCheck for NeverRevoked {
    async fn is_revoked(&self, _token: &TokenId) -> CapabilityResult<bool> {
        Ok(false)
    }
}

/// In-process set of revoked token IDs.
#[derive(Debug, Default)]
pub struct MemoryRevocationList {
    revoked: RwLock<HashSet<TokenId>>,
}

impl MemoryRevocationList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Revoke a token.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Storage`] if the lock is poisoned.
    pub fn revoke(&self, token: TokenId) -> CapabilityResult<()> {
        self.revoked
            .write()
            .map_err(|e| CapabilityError::Storage(e.to_string()))?
            .insert(token);
        tracing::info!(token_id = %token, "token revoked");
        Ok(())
    }

    /// Number of revoked tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revoked.read().map_or(0, |set| set.len())
    }

    /// Whether nothing has been revoked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RevocationCheck for MemoryRevocationList {
    async fn is_revoked(&self, token: &TokenId) -> CapabilityResult<bool> {
        Ok(self
            .revoked
            .read()
            .map_err(|e| CapabilityError::Storage(e.to_string()))?
            .contains(token))
    }
}

/// Remembers answers from a slower checker for a bounded time.
pub struct CachedRevocationCheck<C> {
    inner: C,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<TokenId, (bool, Instant)>>,
}

impl<C: RevocationCheck> CachedRevocationCheck<C> {
    /// Wrap `inner`, caching up to `capacity` answers for `ttl` each.
    #[must_use]
    pub fn new(inner: C, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped checker.
    #[must_use]
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn lookup(&self, token: &TokenId) -> Option<bool> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(token)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(revoked, _)| *revoked)
    }

    fn remember(&self, token: TokenId, revoked: bool) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= self.capacity {
            let ttl = self.ttl;
            entries.retain(|_, (_, at)| at.elapsed() < ttl);
            if entries.len() >= self.capacity {
                entries.clear();
            }
        }
        entries.insert(token, (revoked, Instant::now()));
    }
}

#[async_trait]
impl<C: RevocationCheck> RevocationCheck for CachedRevocationCheck<C> {
    async fn is_revoked(&self, token: &TokenId) -> CapabilityResult<bool> {
        if let Some(revoked) = self.lookup(token) {
            return Ok(revoked);
        }
        let revoked = self.inner.is_revoked(token).await?;
        self.remember(*token, revoked);
        Ok(revoked)
    }
}

impl<C> std::fmt::Debug for CachedRevocationCheck<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRevocationCheck")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
