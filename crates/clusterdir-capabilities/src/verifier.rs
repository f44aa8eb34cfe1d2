//! Token verification.
//!
//! One verification call walks
//! `Parse -> CheckSignature -> CheckExpiry -> CheckAudience -> CheckCapability -> CheckRevocation`
//! and stops at the first failing stage.

use std::sync::Arc;

use tracing::debug;

use crate::capability::Capability;
use crate::clock::{Clock, SystemClock};
use crate::error::{CapabilityError, CapabilityResult};
use crate::principal::Principal;
use crate::revocation::{NeverRevoked, RevocationCheck};
use crate::token::Token;

/// Stages of a verification call, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStage {
    /// Decode the wire token.
    Parse,
    /// Verify the issuer's signature.
    CheckSignature,
    /// Compare `nbf`/`exp` to now.
    CheckExpiry,
    /// Compare the audience to the expected principal.
    CheckAudience,
    /// Check the issuer and that a grant satisfies the requirement.
    CheckCapability,
    /// Ask the revocation hook.
    CheckRevocation,
}

impl VerificationStage {
    /// The stage an error was raised in.
    #[must_use]
    pub fn of(error: &CapabilityError) -> Self {
        match error {
            CapabilityError::InvalidSignature => Self::CheckSignature,
            CapabilityError::TokenExpired { .. } | CapabilityError::TokenNotYetValid { .. } => {
                Self::CheckExpiry
            },
            CapabilityError::AudienceMismatch { .. } => Self::CheckAudience,
            CapabilityError::IssuerNotTrusted { .. } | CapabilityError::CapabilityDenied { .. } => {
                Self::CheckCapability
            },
            CapabilityError::TokenRevoked { .. } | CapabilityError::Storage(_) => {
                Self::CheckRevocation
            },
            _ => Self::Parse,
        }
    }
}

fn denied(error: CapabilityError) -> CapabilityError {
    debug!(stage = ?VerificationStage::of(&error), %error, "token rejected");
    error
}

/// Checks wire tokens.
///
/// Stateless apart from the injected clock and revocation hook, so one
/// verifier can be shared by every request task.
#[derive(Clone)]
pub struct TokenVerifier {
    clock: Arc<dyn Clock>,
    revocation: Arc<dyn RevocationCheck>,
    trusted_issuer: Option<Principal>,
}

impl Default for TokenVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenVerifier {
    /// A verifier on the system clock with no revocation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            revocation: Arc::new(NeverRevoked),
            trusted_issuer: None,
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a revocation hook.
    #[must_use]
    pub fn with_revocation(mut self, revocation: Arc<dyn RevocationCheck>) -> Self {
        self.revocation = revocation;
        self
    }

    /// Only accept tokens signed by `issuer` in
    /// [`verify_signature_and_expiry`](Self::verify_signature_and_expiry).
    ///
    /// Without this, any `did:key` issuer whose signature checks out is
    /// accepted there, and issuer trust is left to
    /// [`verify_capability`](Self::verify_capability).
    #[must_use]
    pub fn with_trusted_issuer(mut self, issuer: Principal) -> Self {
        self.trusted_issuer = Some(issuer);
        self
    }

    /// Parse, check the signature and check the time bounds.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage.
    pub fn verify(&self, wire: &str) -> CapabilityResult<Token> {
        let token = Token::decode(wire).map_err(denied)?;
        token.verify_signature().map_err(denied)?;
        if let Some(trusted) = &self.trusted_issuer
            && &token.issuer != trusted
        {
            return Err(denied(CapabilityError::IssuerNotTrusted {
                issuer: token.issuer.to_string(),
            }));
        }
        token
            .check_time_bounds(self.clock.now().timestamp())
            .map_err(denied)?;
        Ok(token)
    }

    /// The audience of a valid, unexpired token, or `None`.
    ///
    /// Callers must treat `None` as "unauthenticated" whatever the cause.
    #[must_use]
    pub fn verify_signature_and_expiry(&self, wire: &str) -> Option<Principal> {
        self.verify(wire).ok().map(|token| token.audience)
    }

    /// Run every stage against `required`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing stage.
    pub async fn check_capability(
        &self,
        wire: &str,
        audience: &Principal,
        root_issuer: &Principal,
        required: &Capability,
    ) -> CapabilityResult<Token> {
        let token = self.verify(wire)?;

        if &token.audience != audience {
            return Err(denied(CapabilityError::AudienceMismatch {
                expected: audience.to_string(),
                actual: token.audience.to_string(),
            }));
        }

        // Single hop: the root authority must have signed this token itself.
        if &token.issuer != root_issuer {
            return Err(denied(CapabilityError::IssuerNotTrusted {
                issuer: token.issuer.to_string(),
            }));
        }
        if !token.grants(required) {
            return Err(denied(CapabilityError::CapabilityDenied {
                required: required.to_string(),
            }));
        }

        match self.revocation.is_revoked(&token.id).await {
            Ok(false) => Ok(token),
            Ok(true) => Err(denied(CapabilityError::TokenRevoked {
                token_id: token.id.to_string(),
            })),
            Err(e) => Err(denied(e)),
        }
    }

    /// Whether the token lets `audience` exercise `required` under `root_issuer`.
    pub async fn verify_capability(
        &self,
        wire: &str,
        audience: &Principal,
        root_issuer: &Principal,
        required: &Capability,
    ) -> bool {
        self.check_capability(wire, audience, root_issuer, required)
            .await
            .is_ok()
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("trusted_issuer", &self.trusted_issuer)
            .finish_non_exhaustive()
    }
}
