//! Principal identifiers.

use clusterdir_crypto::{CryptoResult, PublicKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An identity, normally a `did:key` string.
///
/// Treated as an opaque key everywhere except signature checks, where the
/// issuer's verification key is recovered from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Wrap an identifier as-is.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The `did:key` principal of a public key.
    #[must_use]
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(key.did())
    }

    /// The identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the Ed25519 key, if this is a `did:key`.
    ///
    /// # Errors
    ///
    /// Returns a crypto error if the identifier is not a valid Ed25519 `did:key`.
    pub fn public_key(&self) -> CryptoResult<PublicKey> {
        PublicKey::from_did(&self.0)
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&PublicKey> for Principal {
    fn from(key: &PublicKey) -> Self {
        Self::from_public_key(key)
    }
}

impl From<String> for Principal {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for Principal {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl PartialEq<str> for Principal {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Principal {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
