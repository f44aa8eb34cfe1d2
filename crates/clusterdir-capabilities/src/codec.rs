//! Wire codec for UCAN 0.10 JWT-style tokens.
//!
//! `base64url(header) . base64url(payload) . base64url(signature)`, no padding.
//! The signature covers the first two segments exactly as transmitted.
//! Decoding never panics on attacker-controlled input; every failure is a
//! [`CapabilityError::MalformedToken`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use clusterdir_crypto::{KeyPair, Signature};
use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};

/// Signing algorithm identifier.
pub const TOKEN_ALGORITHM: &str = "EdDSA";

/// Token type tag.
pub const TOKEN_TYPE: &str = "JWT";

/// UCAN version we emit.
pub const UCAN_VERSION: &str = "0.10.0";

/// Largest wire token we will try to decode.
pub const MAX_TOKEN_LEN: usize = 16 * 1024;

const SEGMENT_DELIMITER: char = '.';

/// Token header segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signature algorithm.
    pub alg: String,
    /// Type tag.
    pub typ: String,
    /// UCAN version.
    pub ucv: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
            ucv: UCAN_VERSION.to_string(),
        }
    }
}

/// One `att` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaim {
    /// Resource, `scheme:path`.
    pub with: String,
    /// Ability, `namespace/segment...` or `*`.
    pub can: String,
}

/// Token payload segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Issuer `did:key`.
    pub iss: String,
    /// Audience principal.
    pub aud: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Not before, seconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    /// Expires at, seconds since the epoch.
    pub exp: i64,
    /// Nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nnc: Option<String>,
    /// Facts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fct: Option<serde_json::Value>,
    /// Attenuations.
    pub att: Vec<CapabilityClaim>,
    /// Proofs. Always emitted empty; only single-hop tokens are accepted.
    #[serde(default)]
    pub prf: Vec<String>,
}

/// A token split into its parts.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    /// Header segment.
    pub header: TokenHeader,
    /// Payload segment.
    pub payload: TokenPayload,
    /// Signature segment.
    pub signature: Signature,
    /// The `header.payload` bytes the signature covers.
    pub signing_input: String,
}

fn encode_segment<T: Serialize>(value: &T) -> CapabilityResult<String> {
    let json =
        serde_json::to_vec(value).map_err(|e| CapabilityError::Serialization(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str, what: &str) -> CapabilityResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| CapabilityError::MalformedToken(format!("{what} is not base64url")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CapabilityError::MalformedToken(format!("{what}: {e}")))
}

/// Build the `header.payload` string that gets signed.
///
/// # Errors
///
/// Returns [`CapabilityError::Serialization`] if either part fails to serialize.
pub fn signing_input(header: &TokenHeader, payload: &TokenPayload) -> CapabilityResult<String> {
    Ok(format!(
        "{}{SEGMENT_DELIMITER}{}",
        encode_segment(header)?,
        encode_segment(payload)?
    ))
}

/// Append a signature to a signing input.
#[must_use]
pub fn encode_signed(signing_input: &str, signature: &Signature) -> String {
    format!(
        "{signing_input}{SEGMENT_DELIMITER}{}",
        signature.to_base64url()
    )
}

/// Serialize and sign a token.
///
/// # Errors
///
/// Returns [`CapabilityError::Serialization`] if serialization fails.
pub fn encode(
    header: &TokenHeader,
    payload: &TokenPayload,
    signer: &KeyPair,
) -> CapabilityResult<String> {
    let input = signing_input(header, payload)?;
    let signature = signer.sign(input.as_bytes());
    Ok(encode_signed(&input, &signature))
}

/// Split a wire token into header, payload and signature.
///
/// Checks structure only. The signature is not verified here.
///
/// # Errors
///
/// Returns [`CapabilityError::MalformedToken`] on a wrong segment count, bad
/// encoding, missing fields, or an unsupported algorithm or version.
pub fn decode(wire: &str) -> CapabilityResult<DecodedToken> {
    if wire.len() > MAX_TOKEN_LEN {
        return Err(CapabilityError::MalformedToken(format!(
            "token exceeds {MAX_TOKEN_LEN} bytes"
        )));
    }

    let mut segments = wire.split(SEGMENT_DELIMITER);
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(CapabilityError::MalformedToken(
            "expected three segments".to_string(),
        ));
    };
    if header_b64.is_empty() || payload_b64.is_empty() || signature_b64.is_empty() {
        return Err(CapabilityError::MalformedToken("empty segment".to_string()));
    }

    let header: TokenHeader = decode_segment(header_b64, "header")?;
    if header.alg != TOKEN_ALGORITHM {
        return Err(CapabilityError::MalformedToken(format!(
            "unsupported algorithm {}",
            header.alg
        )));
    }
    if !header.typ.eq_ignore_ascii_case(TOKEN_TYPE) {
        return Err(CapabilityError::MalformedToken(format!(
            "unsupported type {}",
            header.typ
        )));
    }
    if !header.ucv.starts_with("0.10.") {
        return Err(CapabilityError::MalformedToken(format!(
            "unsupported ucan version {}",
            header.ucv
        )));
    }

    let payload: TokenPayload = decode_segment(payload_b64, "payload")?;
    let signature = Signature::from_base64url(signature_b64)
        .map_err(|e| CapabilityError::MalformedToken(format!("signature: {e}")))?;

    // header_b64 and payload_b64 are adjacent slices of `wire`.
    let signing_input = format!("{header_b64}{SEGMENT_DELIMITER}{payload_b64}");

    Ok(DecodedToken {
        header,
        payload,
        signature,
        signing_input,
    })
}
