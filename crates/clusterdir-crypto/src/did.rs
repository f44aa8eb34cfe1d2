//! `did:key` encoding of Ed25519 public keys.
//!
//! A principal is written `did:key:z<base58btc(0xED 0x01 || key)>`. The
//! `z…` tail on its own is the multibase form, which is also what clients
//! send in the `X-Public-Key` header.

use base58::{FromBase58, ToBase58};

use crate::error::{CryptoError, CryptoResult};
use crate::keypair::PublicKey;

/// Prefix of every `did:key` identifier.
pub const DID_KEY_PREFIX: &str = "did:key:";

/// Multicodec varint for an Ed25519 public key.
pub const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Multibase prefix for base58btc.
const BASE58BTC_PREFIX: char = 'z';

/// Longest base58 string a 34-byte multicodec key can encode to.
///
/// The `base58` decoder slices a fixed buffer by the count of leading `1`s
/// and panics when that count is too large, so longer input never reaches it.
const MAX_KEY_BASE58_LEN: usize = 48;

impl PublicKey {
    /// Encode as a multibase (base58btc) string carrying the Ed25519 multicodec.
    #[must_use]
    pub fn to_multibase(&self) -> String {
        let mut raw = Vec::with_capacity(34);
        raw.extend_from_slice(&ED25519_MULTICODEC);
        raw.extend_from_slice(self.as_bytes());
        format!("{BASE58BTC_PREFIX}{}", raw.to_base58())
    }

    /// Decode from the multibase form produced by [`to_multibase`](Self::to_multibase).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidDid`] if the prefix or multicodec is wrong
    /// or the string is longer than any encoded key,
    /// [`CryptoError::InvalidBase58Encoding`] for bad base58, or
    /// [`CryptoError::InvalidPublicKey`] if the bytes are not a curve point.
    pub fn from_multibase(s: &str) -> CryptoResult<Self> {
        let b58 = s
            .strip_prefix(BASE58BTC_PREFIX)
            .ok_or(CryptoError::InvalidDid("missing base58btc multibase prefix"))?;
        if b58.len() > MAX_KEY_BASE58_LEN {
            return Err(CryptoError::InvalidDid("multibase key too long"));
        }
        let raw = b58
            .from_base58()
            .map_err(|_| CryptoError::InvalidBase58Encoding)?;
        let key = raw
            .strip_prefix(&ED25519_MULTICODEC[..])
            .ok_or(CryptoError::InvalidDid("not an ed25519 multicodec key"))?;
        let pk = Self::try_from_slice(key)?;
        ed25519_dalek::VerifyingKey::from_bytes(pk.as_bytes())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(pk)
    }

    /// Render as a `did:key` principal identifier.
    #[must_use]
    pub fn did(&self) -> String {
        format!("{DID_KEY_PREFIX}{}", self.to_multibase())
    }

    /// Parse a `did:key` principal identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidDid`] if the `did:key:` header is missing,
    /// or any error from [`from_multibase`](Self::from_multibase).
    pub fn from_did(did: &str) -> CryptoResult<Self> {
        let multibase = did
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or(CryptoError::InvalidDid("missing did:key header"))?;
        Self::from_multibase(multibase)
    }
}
