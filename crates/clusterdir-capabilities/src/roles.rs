//! Role-based capability resolution.
//!
//! Users hold roles, roles hold capability IDs, capability IDs name stored
//! capabilities. Persistence lives outside this crate behind
//! [`CapabilityStore`] and [`UserKeyStore`]; the in-memory versions here back
//! tests and the CLI.

use async_trait::async_trait;
use clusterdir_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::capability::Capability;
use crate::error::{CapabilityError, CapabilityResult};

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

/// A role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub u64);

/// A stored capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Role and capability storage.
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Roles assigned to a user.
    async fn roles_for_user(&self, user: &UserId) -> CapabilityResult<Vec<RoleId>>;

    /// Capability IDs granted to a role.
    async fn capability_ids_for_role(&self, role: RoleId) -> CapabilityResult<Vec<CapabilityId>>;

    /// Look up a stored capability.
    async fn capability(&self, id: CapabilityId) -> CapabilityResult<Option<Capability>>;
}

/// Maps client public keys to user accounts.
#[async_trait]
pub trait UserKeyStore: Send + Sync {
    /// The user a key is registered to, if any.
    async fn user_for_key(&self, key: &PublicKey) -> CapabilityResult<Option<UserId>>;
}

#[async_trait]
impl<T: CapabilityStore + ?Sized> CapabilityStore for Arc<T> {
    async fn roles_for_user(&self, user: &UserId) -> CapabilityResult<Vec<RoleId>> {
        (**self).roles_for_user(user).await
    }

    async fn capability_ids_for_role(&self, role: RoleId) -> CapabilityResult<Vec<CapabilityId>> {
        (**self).capability_ids_for_role(role).await
    }

    async fn capability(&self, id: CapabilityId) -> CapabilityResult<Option<Capability>> {
        (**self).capability(id).await
    }
}

#[async_trait]
impl<T: UserKeyStore + ?Sized> UserKeyStore for Arc<T> {
    async fn user_for_key(&self, key: &PublicKey) -> CapabilityResult<Option<UserId>> {
        (**self).user_for_key(key).await
    }
}

/// Resolves a user to the flat set of capabilities their roles grant.
#[derive(Debug, Clone)]
pub struct RoleCapabilityResolver<S> {
    store: S,
}

impl<S: CapabilityStore> RoleCapabilityResolver<S> {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The wrapped store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Every capability granted to `user` through any role, de-duplicated.
    ///
    /// IDs that no longer resolve to a capability are skipped.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn capabilities_for_user(
        &self,
        user: &UserId,
    ) -> CapabilityResult<BTreeSet<Capability>> {
        let mut ids = BTreeSet::new();
        for role in self.store.roles_for_user(user).await? {
            ids.extend(self.store.capability_ids_for_role(role).await?);
        }

        let mut capabilities = BTreeSet::new();
        for id in ids {
            match self.store.capability(id).await? {
                Some(capability) => {
                    capabilities.insert(capability);
                },
                None => tracing::warn!(user = %user, capability_id = id.0, "dangling capability id"),
            }
        }

        tracing::debug!(user = %user, count = capabilities.len(), "resolved capabilities");
        Ok(capabilities)
    }
}

fn poisoned<E: fmt::Display>(e: E) -> CapabilityError {
    CapabilityError::Storage(e.to_string())
}

/// In-memory [`CapabilityStore`].
#[derive(Debug, Default)]
pub struct MemoryCapabilityStore {
    capabilities: RwLock<HashMap<CapabilityId, Capability>>,
    role_capabilities: RwLock<HashMap<RoleId, Vec<CapabilityId>>>,
    user_roles: RwLock<HashMap<UserId, Vec<RoleId>>>,
}

impl MemoryCapabilityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a capability under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Storage`] if the lock is poisoned.
    pub fn insert_capability(&self, id: CapabilityId, capability: Capability) -> CapabilityResult<()> {
        self.capabilities
            .write()
            .map_err(poisoned)?
            .insert(id, capability);
        Ok(())
    }

    /// Grant a capability to a role.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Storage`] if the lock is poisoned.
    pub fn grant_to_role(&self, role: RoleId, capability: CapabilityId) -> CapabilityResult<()> {
        let mut grants = self.role_capabilities.write().map_err(poisoned)?;
        let ids = grants.entry(role).or_default();
        if !ids.contains(&capability) {
            ids.push(capability);
        }
        Ok(())
    }

    /// Assign a role to a user.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Storage`] if the lock is poisoned.
    pub fn assign_role(&self, user: UserId, role: RoleId) -> CapabilityResult<()> {
        let mut assignments = self.user_roles.write().map_err(poisoned)?;
        let roles = assignments.entry(user).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
        Ok(())
    }
}

#[async_trait]
impl CapabilityStore for MemoryCapabilityStore {
    async fn roles_for_user(&self, user: &UserId) -> CapabilityResult<Vec<RoleId>> {
        Ok(self
            .user_roles
            .read()
            .map_err(poisoned)?
            .get(user)
            .cloned()
            .unwrap_or_default())
    }

    async fn capability_ids_for_role(&self, role: RoleId) -> CapabilityResult<Vec<CapabilityId>> {
        Ok(self
            .role_capabilities
            .read()
            .map_err(poisoned)?
            .get(&role)
            .cloned()
            .unwrap_or_default())
    }

    async fn capability(&self, id: CapabilityId) -> CapabilityResult<Option<Capability>> {
        Ok(self.capabilities.read().map_err(poisoned)?.get(&id).cloned())
    }
}

/// In-memory [`UserKeyStore`].
#[derive(Debug, Default)]
pub struct MemoryUserKeyStore {
    keys: RwLock<HashMap<PublicKey, UserId>>,
}

impl MemoryUserKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key to a user.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Storage`] if the lock is poisoned.
    pub fn register(&self, key: PublicKey, user: UserId) -> CapabilityResult<()> {
        self.keys.write().map_err(poisoned)?.insert(key, user);
        Ok(())
    }

    /// Remove a key.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Storage`] if the lock is poisoned.
    pub fn remove(&self, key: &PublicKey) -> CapabilityResult<Option<UserId>> {
        Ok(self.keys.write().map_err(poisoned)?.remove(key))
    }
}

#[async_trait]
impl UserKeyStore for MemoryUserKeyStore {
    async fn user_for_key(&self, key: &PublicKey) -> CapabilityResult<Option<UserId>> {
        Ok(self.keys.read().map_err(poisoned)?.get(key).cloned())
    }
}
