//! Capability tokens and the token issuer.
//!
//! A [`Token`] is the decoded, not-yet-trusted view of a wire token.
//! [`TokenBuilder`] is the issuer: it fills in timestamps, defaults to the
//! root capability and signs with the authority key.

use chrono::{DateTime, Duration, Utc};
use clusterdir_crypto::{ContentHash, KeyPair, Signature};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::capability::Capability;
use crate::codec::{self, CapabilityClaim, DecodedToken, TokenHeader, TokenPayload};
use crate::error::{CapabilityError, CapabilityResult};
use crate::principal::Principal;

const TOKEN_ID_DOMAIN: &str = "clusterdir 2024 token-id v1";

/// Identity of a wire token, used by the revocation hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(ContentHash);

impl TokenId {
    /// Derive the ID of a wire token.
    #[must_use]
    pub fn of_wire(wire: &str) -> Self {
        Self(ContentHash::hash_with_domain(TOKEN_ID_DOMAIN, wire.as_bytes()))
    }

    /// Hex form.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Parse the hex form.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Serialization`] if `s` is not 32 bytes of hex.
    pub fn from_hex(s: &str) -> CapabilityResult<Self> {
        ContentHash::from_hex(s)
            .map(Self)
            .map_err(|e| CapabilityError::Serialization(e.to_string()))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded token.
///
/// Decoding says nothing about trust: call [`verify_signature`](Self::verify_signature)
/// or go through [`TokenVerifier`](crate::TokenVerifier).
#[derive(Debug, Clone)]
pub struct Token {
    /// Token identity.
    pub id: TokenId,
    /// Who signed it.
    pub issuer: Principal,
    /// Who it was issued to.
    pub audience: Principal,
    /// Issued at, seconds since the epoch.
    pub issued_at: i64,
    /// Not valid before, seconds since the epoch.
    pub not_before: Option<i64>,
    /// Expires at, seconds since the epoch.
    pub expires_at: i64,
    /// Nonce.
    pub nonce: Option<String>,
    /// Facts.
    pub facts: Option<serde_json::Value>,
    /// Embedded capabilities.
    pub capabilities: Vec<Capability>,
    signing_input: String,
    signature: Signature,
}

impl Token {
    /// Decode a wire token.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedToken`] if the token does not parse
    /// or carries an unparseable capability.
    pub fn decode(wire: &str) -> CapabilityResult<Self> {
        let DecodedToken {
            payload,
            signature,
            signing_input,
            ..
        } = codec::decode(wire)?;

        let capabilities = payload
            .att
            .iter()
            .map(|claim| Capability::parse(&claim.with, &claim.can))
            .collect::<CapabilityResult<Vec<_>>>()
            .map_err(|e| CapabilityError::MalformedToken(e.to_string()))?;

        Ok(Self {
            id: TokenId::of_wire(wire),
            issuer: Principal::new(payload.iss),
            audience: Principal::new(payload.aud),
            issued_at: payload.iat,
            not_before: payload.nbf,
            expires_at: payload.exp,
            nonce: payload.nnc,
            facts: payload.fct,
            capabilities,
            signing_input,
            signature,
        })
    }

    /// Check the signature against the key embedded in the issuer `did:key`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidSignature`] if the issuer is not a
    /// `did:key` or the signature does not verify.
    pub fn verify_signature(&self) -> CapabilityResult<()> {
        let key = self
            .issuer
            .public_key()
            .map_err(|_| CapabilityError::InvalidSignature)?;
        key.verify(self.signing_input.as_bytes(), &self.signature)
            .map_err(|_| CapabilityError::InvalidSignature)
    }

    /// Check the time bounds: valid iff `nbf <= now <= exp`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::TokenExpired`] or [`CapabilityError::TokenNotYetValid`].
    pub fn check_time_bounds(&self, now: i64) -> CapabilityResult<()> {
        if now > self.expires_at {
            return Err(CapabilityError::TokenExpired {
                expires_at: self.expires_at,
            });
        }
        if let Some(not_before) = self.not_before
            && now < not_before
        {
            return Err(CapabilityError::TokenNotYetValid { not_before });
        }
        Ok(())
    }

    /// Has the token expired at `now`?
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Does any embedded capability satisfy `required`?
    #[must_use]
    pub fn grants(&self, required: &Capability) -> bool {
        self.capabilities.iter().any(|c| c.satisfies(required))
    }
}

/// Builds and signs tokens.
///
/// ```
/// use clusterdir_capabilities::{Capability, Token, TokenBuilder};
/// use clusterdir_crypto::KeyPair;
///
/// let authority = KeyPair::generate();
/// let wire = TokenBuilder::new("did:key:zABC")
///     .lifetime_secs(3600)
///     .sign(&authority)
///     .unwrap();
///
/// let token = Token::decode(&wire).unwrap();
/// assert_eq!(token.capabilities, vec![Capability::root()]);
/// assert!(token.verify_signature().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    audience: Principal,
    lifetime: Duration,
    capabilities: Vec<Capability>,
    issued_at: Option<DateTime<Utc>>,
    not_before: Option<DateTime<Utc>>,
    nonce: Option<String>,
    facts: Option<serde_json::Value>,
}

impl TokenBuilder {
    /// Start a token for `audience`, lifetime one hour.
    #[must_use]
    pub fn new(audience: impl Into<Principal>) -> Self {
        Self {
            audience: audience.into(),
            lifetime: Duration::hours(1),
            capabilities: Vec::new(),
            issued_at: None,
            not_before: None,
            nonce: None,
            facts: None,
        }
    }

    /// Set the lifetime.
    #[must_use]
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Set the lifetime in seconds.
    #[must_use]
    pub fn lifetime_secs(self, secs: u64) -> Self {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self.lifetime(Duration::try_seconds(secs).unwrap_or(Duration::MAX))
    }

    /// Add a capability. Without any, the root capability is embedded.
    #[must_use]
    pub fn capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Add several capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        for capability in capabilities {
            self = self.capability(capability);
        }
        self
    }

    /// Fix the issue time (defaults to now).
    #[must_use]
    pub fn issued_at(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = Some(at);
        self
    }

    /// Set `nbf`.
    #[must_use]
    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    /// Set a nonce.
    #[must_use]
    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Set a random 96-bit nonce.
    #[must_use]
    pub fn random_nonce(self) -> Self {
        let mut bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        self.nonce(base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            bytes,
        ))
    }

    /// Attach facts.
    #[must_use]
    pub fn facts(mut self, facts: serde_json::Value) -> Self {
        self.facts = Some(facts);
        self
    }

    fn payload(&self, issuer: &KeyPair) -> CapabilityResult<TokenPayload> {
        if self.lifetime <= Duration::zero() {
            return Err(CapabilityError::Configuration(
                "token lifetime must be positive".to_string(),
            ));
        }
        let issued_at = self.issued_at.unwrap_or_else(Utc::now);
        let expires_at = issued_at
            .checked_add_signed(self.lifetime)
            .ok_or_else(|| CapabilityError::Configuration("token lifetime overflows".to_string()))?;

        let root = [Capability::root()];
        let granted: &[Capability] = if self.capabilities.is_empty() {
            &root
        } else {
            &self.capabilities
        };
        let att = granted
            .iter()
            .map(|c| CapabilityClaim {
                with: c.with(),
                can: c.can(),
            })
            .collect();

        Ok(TokenPayload {
            iss: issuer.did(),
            aud: self.audience.to_string(),
            iat: issued_at.timestamp(),
            nbf: self.not_before.map(|t| t.timestamp()),
            exp: expires_at.timestamp(),
            nnc: self.nonce.clone(),
            fct: self.facts.clone(),
            att,
            prf: Vec::new(),
        })
    }

    /// Sign with `issuer` and return the wire token.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Configuration`] for a non-positive lifetime,
    /// or [`CapabilityError::Serialization`] if encoding fails.
    pub fn sign(self, issuer: &KeyPair) -> CapabilityResult<String> {
        let payload = self.payload(issuer)?;
        let wire = codec::encode(&TokenHeader::default(), &payload, issuer)?;
        tracing::debug!(
            audience = %self.audience,
            expires_at = payload.exp,
            capabilities = payload.att.len(),
            "issued token"
        );
        Ok(wire)
    }
}

/// Issue a token: `audience` may exercise `capabilities` (root if empty)
/// for `lifetime_secs` from now.
///
/// # Errors
///
/// See [`TokenBuilder::sign`].
pub fn issue(
    signing_key: &KeyPair,
    audience: &Principal,
    lifetime_secs: u64,
    capabilities: impl IntoIterator<Item = Capability>,
) -> CapabilityResult<String> {
    TokenBuilder::new(audience.clone())
        .lifetime_secs(lifetime_secs)
        .capabilities(capabilities)
        .sign(signing_key)
}
