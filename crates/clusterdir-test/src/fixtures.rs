//! Deterministic fixtures for keys, authorities and stores.

use std::sync::Arc;

use clusterdir_capabilities::{
    AuthorityContext, Capability, CapabilityId, FixedClock, MemoryCapabilityStore,
    MemoryRevocationList, MemoryUserKeyStore, Principal, RequestSignature, RoleId, UserId,
};
use clusterdir_crypto::KeyPair;

/// Fixed "now" for tests, seconds since the epoch (June 2025).
pub const TEST_EPOCH: i64 = 1_750_000_000;

/// Seed of the root key used by [`test_authority`].
pub const ROOT_SEED: u8 = 1;

/// Role granting cluster writes.
pub const CLUSTER_EDITOR: RoleId = RoleId(1);

/// Role granting admin capability management.
pub const CAPABILITY_ADMIN: RoleId = RoleId(2);

/// Key pair derived from a repeated seed byte. Same seed, same key.
///
/// # Panics
///
/// Never in practice; every 32-byte seed is a valid Ed25519 secret.
#[must_use]
pub fn test_keypair(seed: u8) -> KeyPair {
    KeyPair::from_secret_key(&[seed; 32]).expect("32-byte seed is always valid")
}

/// The `did:key` principal of [`test_keypair`]`(seed)`.
#[must_use]
pub fn test_principal(seed: u8) -> Principal {
    Principal::from_public_key(&test_keypair(seed).export_public_key())
}

/// A clock frozen at [`TEST_EPOCH`].
#[must_use]
pub fn test_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::at_unix(TEST_EPOCH))
}

/// An authority with its injectable parts exposed for manipulation.
#[derive(Debug)]
pub struct TestAuthority {
    /// The authority, signing with [`test_keypair`]`(ROOT_SEED)`.
    pub authority: AuthorityContext,
    /// Its clock.
    pub clock: Arc<FixedClock>,
    /// Its revocation list.
    pub revocations: Arc<MemoryRevocationList>,
    /// Its key→user registry.
    pub user_keys: Arc<MemoryUserKeyStore>,
}

impl TestAuthority {
    /// Signature headers over `body` from `key`, timed at the current test clock.
    #[must_use]
    pub fn sign_request(&self, key: &KeyPair, body: &[u8]) -> RequestSignature {
        RequestSignature::sign(key, body, self.clock_ms())
    }

    /// Current test time in milliseconds.
    #[must_use]
    pub fn clock_ms(&self) -> i64 {
        use clusterdir_capabilities::Clock;
        self.clock.now().timestamp_millis()
    }

    /// The root principal.
    #[must_use]
    pub fn root(&self) -> &Principal {
        self.authority.root_issuer()
    }
}

/// An authority on a fixed clock with an in-memory revocation list and key
/// store, using the built-in `/api` route table.
///
/// # Panics
///
/// Panics if the built-in route table fails validation.
#[must_use]
pub fn test_authority() -> TestAuthority {
    let clock = test_clock();
    let revocations = Arc::new(MemoryRevocationList::new());
    let user_keys = Arc::new(MemoryUserKeyStore::new());
    let authority = AuthorityContext::new(test_keypair(ROOT_SEED))
        .expect("built-in route table is valid")
        .with_clock(clock.clone())
        .with_revocation(revocations.clone())
        .with_user_keys(user_keys.clone());

    TestAuthority {
        authority,
        clock,
        revocations,
        user_keys,
    }
}

/// A store with two roles:
///
/// - [`CLUSTER_EDITOR`]: create, update and delete clusters
/// - [`CAPABILITY_ADMIN`]: read and create admin capabilities
///
/// `alice` is an editor, `bob` holds both roles, `carol` holds none. Role 2
/// also references a capability id that does not exist.
///
/// # Panics
///
/// Panics if the store lock is poisoned.
#[must_use]
pub fn seeded_capability_store() -> MemoryCapabilityStore {
    let store = MemoryCapabilityStore::new();
    let grants = [
        (1, CLUSTER_EDITOR, Capability::new("api", "/clusters", "clusters", ["POST"])),
        (2, CLUSTER_EDITOR, Capability::new("api", "/clusters/*", "clusters", ["PUT"])),
        (3, CLUSTER_EDITOR, Capability::new("api", "/clusters/*", "clusters", ["DELETE"])),
        (
            4,
            CAPABILITY_ADMIN,
            Capability::new("api", "/admin/capabilities", "admin-capabilities", ["GET"]),
        ),
        (
            5,
            CAPABILITY_ADMIN,
            Capability::new("api", "/admin/capabilities", "admin-capabilities", ["POST"]),
        ),
    ];
    for (id, role, capability) in grants {
        store
            .insert_capability(CapabilityId(id), capability)
            .expect("store lock");
        store.grant_to_role(role, CapabilityId(id)).expect("store lock");
    }
    store
        .grant_to_role(CAPABILITY_ADMIN, CapabilityId(99))
        .expect("store lock");

    store
        .assign_role(UserId::from("alice"), CLUSTER_EDITOR)
        .expect("store lock");
    store
        .assign_role(UserId::from("bob"), CLUSTER_EDITOR)
        .expect("store lock");
    store
        .assign_role(UserId::from("bob"), CAPABILITY_ADMIN)
        .expect("store lock");
    store
}
