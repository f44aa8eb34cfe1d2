//! Capability-related error types.

use thiserror::Error;

/// Errors raised while issuing, decoding or checking capability tokens.
///
/// These stay on the server. At the request boundary every token error is
/// collapsed into a [`DenyReason`](crate::DenyReason) so clients cannot tell
/// a forged token from an expired one.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Missing or invalid server key material.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Token could not be parsed.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// Token has expired.
    #[error("token expired at {expires_at}")]
    TokenExpired {
        /// Expiry, seconds since the epoch.
        expires_at: i64,
    },

    /// Token `nbf` is still in the future.
    #[error("token not valid before {not_before}")]
    TokenNotYetValid {
        /// Activation time, seconds since the epoch.
        not_before: i64,
    },

    /// Invalid token signature.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Token was issued to someone else.
    #[error("audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch {
        /// The audience the caller expected.
        expected: String,
        /// The audience in the token.
        actual: String,
    },

    /// Token issuer is not the root authority.
    #[error("issuer not trusted: {issuer}")]
    IssuerNotTrusted {
        /// The untrusted issuer.
        issuer: String,
    },

    /// No embedded capability satisfies the requirement.
    #[error("capability denied: required {required}")]
    CapabilityDenied {
        /// The required capability, in `with#can` form.
        required: String,
    },

    /// Token has been revoked.
    #[error("token revoked: {token_id}")]
    TokenRevoked {
        /// The revoked token ID.
        token_id: String,
    },

    /// Capability string could not be parsed.
    #[error("invalid capability: {value} - {reason}")]
    InvalidCapability {
        /// The offending value.
        value: String,
        /// Why it's invalid.
        reason: String,
    },

    /// Route table failed validation.
    #[error("invalid route table: {0}")]
    RouteTable(String),

    /// Signed request headers are missing, malformed or don't verify.
    #[error("invalid request signature: {0}")]
    InvalidRequestSignature(String),

    /// Signed request timer is outside the accepted window.
    #[error("request timer outside skew window ({skew_ms} ms)")]
    ClockSkew {
        /// Observed distance from server time, in milliseconds.
        skew_ms: i64,
    },

    /// Signing key is not registered to any user.
    #[error("unknown public key: {0}")]
    UnknownPublicKey(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] clusterdir_crypto::CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;
