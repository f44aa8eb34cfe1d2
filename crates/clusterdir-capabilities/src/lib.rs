//! Clusterdir Capabilities - UCAN capability tokens and request authorization.
//!
//! This crate provides:
//! - A capability model (`with` resource, `can` ability) with wildcard matching
//! - UCAN 0.10 JWT encoding, issuing and staged verification of tokens
//! - A validated route table mapping API routes to required capabilities
//! - Request authorization with collapsed, client-safe deny reasons
//! - Signed-request authentication for key-holding clients
//! - Role-based capability resolution and revocation hooks
//!
//! # Trust model
//!
//! Tokens are trusted only when the configured root issuer signed them
//! directly. Proof chains are not followed.
//!
//! # Example
//!
//! ```
//! use clusterdir_capabilities::{AuthorityContext, Method, Principal};
//! use clusterdir_crypto::KeyPair;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let authority = AuthorityContext::new(KeyPair::generate()).unwrap();
//! let session = authority.issue_session(&Principal::new("did:key:zABC")).unwrap();
//!
//! let decision = authority
//!     .authorizer()
//!     .authorize(Some(&session.token), Method::Post, "/api/clusters", false)
//!     .await;
//! assert!(decision.is_allowed());
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod codec;
pub mod prelude;

mod authority;
mod authorizer;
mod capability;
mod clock;
mod error;
mod principal;
mod revocation;
mod roles;
mod routes;
mod session;
mod signed_request;
mod token;
mod verifier;

pub use authority::{AuthorityContext, SessionGrant};
pub use authorizer::{AuthRequest, Decision, DenyReason, RequestAuthorizer};
pub use capability::{
    API_SCHEME, Capability, EMAIL_NAMESPACE, EmailAction, MAILTO_SCHEME, WILDCARD,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CapabilityError, CapabilityResult};
pub use principal::Principal;
pub use revocation::{CachedRevocationCheck, MemoryRevocationList, NeverRevoked, RevocationCheck};
pub use roles::{
    CapabilityId, CapabilityStore, MemoryCapabilityStore, MemoryUserKeyStore,
    RoleCapabilityResolver, RoleId, UserId, UserKeyStore,
};
pub use routes::{Access, Method, RouteRule, RouteTable, builtin_rules};
pub use session::{DEFAULT_COOKIE_MAX_AGE_SECS, DEFAULT_COOKIE_NAME, SessionCookie};
pub use signed_request::{
    AuthenticatedRequest, DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CLOCK_SKEW_SECS, HEADER_PUBLIC_KEY,
    HEADER_SIGNATURE, HEADER_TIMER, HEADER_TIMER_SIGNATURE, RequestSignature,
    SignedRequestVerifier,
};
pub use token::{Token, TokenBuilder, TokenId, issue};
pub use verifier::{TokenVerifier, VerificationStage};
