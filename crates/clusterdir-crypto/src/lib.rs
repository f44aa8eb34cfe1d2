//! Clusterdir Crypto - key material for the cluster directory authority.
//!
//! This crate provides:
//! - Ed25519 key pairs with secure memory handling
//! - Signatures over token and request payloads
//! - `did:key` encoding of public keys, used as principal identifiers
//! - BLAKE3 content hashing for token identifiers
//!
//! # Example
//!
//! ```
//! use clusterdir_crypto::{KeyPair, PublicKey};
//!
//! let keypair = KeyPair::generate();
//! let signature = keypair.sign(b"payload");
//! assert!(keypair.verify(b"payload", &signature).is_ok());
//!
//! let did = keypair.export_public_key().did();
//! assert!(did.starts_with("did:key:z"));
//! assert_eq!(PublicKey::from_did(&did).unwrap(), keypair.export_public_key());
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod did;
mod error;
mod hash;
mod keypair;
mod signature;

pub use did::{DID_KEY_PREFIX, ED25519_MULTICODEC};
pub use error::{CryptoError, CryptoResult};
pub use hash::ContentHash;
pub use keypair::{KeyPair, PublicKey};
pub use signature::Signature;
