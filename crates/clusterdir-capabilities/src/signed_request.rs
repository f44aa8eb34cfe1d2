//! Signed-request authentication.
//!
//! Clients that hold a registered key sign each request instead of
//! presenting a session token:
//!
//! | Header | Value |
//! |---|---|
//! | `X-Public-Key` | the client key (`did:key`, multibase or base64) |
//! | `X-Signature` | signature over the raw body |
//! | `X-Timer` | client time, milliseconds since the epoch |
//! | `X-Timer-Signature` | signature over the `X-Timer` string |
//!
//! The timer must fall within a configurable window of server time, which
//! bounds how long a captured request can be replayed.

use chrono::Duration;
use clusterdir_crypto::{KeyPair, PublicKey, Signature};
use std::sync::Arc;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{CapabilityError, CapabilityResult};
use crate::principal::Principal;
use crate::roles::{UserId, UserKeyStore};

/// Client public key header.
pub const HEADER_PUBLIC_KEY: &str = "X-Public-Key";
/// Body signature header.
pub const HEADER_SIGNATURE: &str = "X-Signature";
/// Client timer header.
pub const HEADER_TIMER: &str = "X-Timer";
/// Timer signature header.
pub const HEADER_TIMER_SIGNATURE: &str = "X-Timer-Signature";

/// Default accepted distance between client and server clocks.
pub const DEFAULT_MAX_CLOCK_SKEW_SECS: u64 = 300;

/// Default largest body we will verify.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

fn invalid(reason: impl Into<String>) -> CapabilityError {
    CapabilityError::InvalidRequestSignature(reason.into())
}

fn parse_public_key(value: &str) -> CapabilityResult<PublicKey> {
    let value = value.trim();
    PublicKey::from_did(value)
        .or_else(|_| PublicKey::from_multibase(value))
        .or_else(|_| PublicKey::from_base64(value))
        .map_err(|_| invalid(format!("unrecognised {HEADER_PUBLIC_KEY}")))
}

fn parse_signature(header: &str, value: &str) -> CapabilityResult<Signature> {
    let value = value.trim();
    Signature::from_base64(value)
        .or_else(|_| Signature::from_base64url(value))
        .map_err(|_| invalid(format!("unrecognised {header}")))
}

/// The signature headers of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    /// The client key.
    pub public_key: PublicKey,
    /// Signature over the body.
    pub body_signature: Signature,
    /// The timer exactly as sent.
    pub timer: String,
    /// The timer, milliseconds since the epoch.
    pub timer_ms: i64,
    /// Signature over `timer`.
    pub timer_signature: Signature,
}

impl RequestSignature {
    /// Sign a request body (client side).
    #[must_use]
    pub fn sign(key: &KeyPair, body: &[u8], timer_ms: i64) -> Self {
        let timer = timer_ms.to_string();
        Self {
            public_key: key.export_public_key(),
            body_signature: key.sign(body),
            timer_signature: key.sign(timer.as_bytes()),
            timer,
            timer_ms,
        }
    }

    /// Extract the signature headers.
    ///
    /// Header names are matched case-insensitively. Returns `Ok(None)` when
    /// none of the four headers is present.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidRequestSignature`] if only some are
    /// present or any fails to parse.
    pub fn from_headers<'a>(
        headers: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> CapabilityResult<Option<Self>> {
        let mut public_key = None;
        let mut signature = None;
        let mut timer = None;
        let mut timer_signature = None;

        for (name, value) in headers {
            let slot = if name.eq_ignore_ascii_case(HEADER_PUBLIC_KEY) {
                &mut public_key
            } else if name.eq_ignore_ascii_case(HEADER_SIGNATURE) {
                &mut signature
            } else if name.eq_ignore_ascii_case(HEADER_TIMER) {
                &mut timer
            } else if name.eq_ignore_ascii_case(HEADER_TIMER_SIGNATURE) {
                &mut timer_signature
            } else {
                continue;
            };
            *slot = Some(value);
        }

        let (public_key, signature, timer, timer_signature) =
            match (public_key, signature, timer, timer_signature) {
                (None, None, None, None) => return Ok(None),
                (Some(k), Some(s), Some(t), Some(ts)) => (k, s, t, ts),
                _ => return Err(invalid("incomplete signature headers")),
            };

        let timer = timer.trim();
        let timer_ms = timer
            .parse::<i64>()
            .map_err(|_| invalid(format!("{HEADER_TIMER} is not an integer")))?;

        Ok(Some(Self {
            public_key: parse_public_key(public_key)?,
            body_signature: parse_signature(HEADER_SIGNATURE, signature)?,
            timer: timer.to_string(),
            timer_ms,
            timer_signature: parse_signature(HEADER_TIMER_SIGNATURE, timer_signature)?,
        }))
    }

    /// Render as header pairs.
    #[must_use]
    pub fn to_headers(&self) -> [(&'static str, String); 4] {
        [
            (HEADER_PUBLIC_KEY, self.public_key.did()),
            (HEADER_SIGNATURE, self.body_signature.to_base64()),
            (HEADER_TIMER, self.timer.clone()),
            (HEADER_TIMER_SIGNATURE, self.timer_signature.to_base64()),
        ]
    }

    /// The signer as a principal.
    #[must_use]
    pub fn principal(&self) -> Principal {
        Principal::from_public_key(&self.public_key)
    }
}

/// A request whose signature checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedRequest {
    /// `did:key` of the signer.
    pub principal: Principal,
    /// The signer's key.
    pub public_key: PublicKey,
    /// The account the key belongs to, if registered.
    pub user: Option<UserId>,
}

/// Verifies signed requests.
#[derive(Clone)]
pub struct SignedRequestVerifier {
    clock: Arc<dyn Clock>,
    max_skew: Duration,
    max_body_bytes: usize,
    keys: Option<Arc<dyn UserKeyStore>>,
}

impl Default for SignedRequestVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignedRequestVerifier {
    /// System clock, default window and body limit, no key store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            max_skew: Duration::zero(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            keys: None,
        }
        .with_max_skew_secs(DEFAULT_MAX_CLOCK_SKEW_SECS)
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Accept timers up to `secs` away from server time.
    #[must_use]
    pub fn with_max_skew_secs(mut self, secs: u64) -> Self {
        let secs = i64::try_from(secs).unwrap_or(i64::MAX);
        self.max_skew = Duration::try_seconds(secs).unwrap_or(Duration::MAX);
        self
    }

    /// Refuse bodies larger than `bytes`.
    #[must_use]
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    /// Resolve keys to users through `keys`.
    #[must_use]
    pub fn with_key_store(mut self, keys: Arc<dyn UserKeyStore>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Check the signatures and timer, then look the key up.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidRequestSignature`] for an oversized
    /// body or a bad signature, [`CapabilityError::ClockSkew`] for a stale or
    /// future timer, or a store error.
    pub async fn authenticate(
        &self,
        signature: &RequestSignature,
        body: &[u8],
    ) -> CapabilityResult<AuthenticatedRequest> {
        if body.len() > self.max_body_bytes {
            return Err(invalid(format!(
                "body exceeds {} bytes",
                self.max_body_bytes
            )));
        }

        let now_ms = self.clock.now().timestamp_millis();
        let skew_ms = now_ms.saturating_sub(signature.timer_ms);
        if skew_ms.unsigned_abs() > self.max_skew.num_milliseconds().unsigned_abs() {
            debug!(key = %signature.public_key.key_id_hex(), skew_ms, "signed request outside window");
            return Err(CapabilityError::ClockSkew { skew_ms });
        }

        signature
            .public_key
            .verify(signature.timer.as_bytes(), &signature.timer_signature)
            .map_err(|_| invalid(format!("{HEADER_TIMER_SIGNATURE} does not verify")))?;
        signature
            .public_key
            .verify(body, &signature.body_signature)
            .map_err(|_| invalid(format!("{HEADER_SIGNATURE} does not verify")))?;

        let user = match &self.keys {
            Some(keys) => keys.user_for_key(&signature.public_key).await?,
            None => None,
        };

        debug!(
            principal = %signature.principal(),
            registered = user.is_some(),
            "signed request authenticated"
        );
        Ok(AuthenticatedRequest {
            principal: signature.principal(),
            public_key: signature.public_key,
            user,
        })
    }

    /// Like [`authenticate`](Self::authenticate), but the key must belong to a user.
    ///
    /// # Errors
    ///
    /// Also returns [`CapabilityError::UnknownPublicKey`] for unregistered keys.
    pub async fn authenticate_registered(
        &self,
        signature: &RequestSignature,
        body: &[u8],
    ) -> CapabilityResult<AuthenticatedRequest> {
        let request = self.authenticate(signature, body).await?;
        if request.user.is_none() {
            return Err(CapabilityError::UnknownPublicKey(request.principal.to_string()));
        }
        Ok(request)
    }
}

impl std::fmt::Debug for SignedRequestVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedRequestVerifier")
            .field("max_skew", &self.max_skew)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("has_key_store", &self.keys.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::roles::MemoryUserKeyStore;

    const NOW_MS: i64 = 1_750_000_000_000;

    fn verifier() -> (Arc<FixedClock>, SignedRequestVerifier) {
        let clock = Arc::new(FixedClock::at_unix(NOW_MS / 1000));
        let verifier = SignedRequestVerifier::new().with_clock(clock.clone());
        (clock, verifier)
    }

    fn header_pairs(sig: &RequestSignature) -> Vec<(&'static str, String)> {
        sig.to_headers().to_vec()
    }

    #[tokio::test]
    async fn test_valid_request_authenticates() {
        let (_, verifier) = verifier();
        let key = KeyPair::generate();
        let body = br#"{"name":"alice"}"#;
        let sig = RequestSignature::sign(&key, body, NOW_MS);

        let auth = verifier.authenticate(&sig, body).await.unwrap();
        assert_eq!(auth.principal, Principal::new(key.did()));
        assert!(auth.user.is_none());
    }

    #[test]
    fn test_headers_roundtrip_case_insensitive() {
        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"body", NOW_MS);
        let pairs = header_pairs(&sig);
        let lowered: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();

        let parsed = RequestSignature::from_headers(
            lowered
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .chain([("content-type", "application/json")]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn test_public_key_header_forms() {
        let key = KeyPair::generate();
        let pk = key.export_public_key();
        for form in [pk.did(), pk.to_multibase(), pk.to_base64()] {
            assert_eq!(parse_public_key(&form).unwrap(), pk);
        }
        assert!(parse_public_key("nope").is_err());
    }

    #[test]
    fn test_overlong_public_key_header_rejected() {
        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"", NOW_MS);
        let s = sig.body_signature.to_base64();
        let ts = sig.timer_signature.to_base64();
        let timer = NOW_MS.to_string();

        for pk in [
            format!("did:key:z{}", "1".repeat(200)),
            format!("z{}", "1".repeat(200)),
        ] {
            let result = RequestSignature::from_headers([
                (HEADER_PUBLIC_KEY, pk.as_str()),
                (HEADER_SIGNATURE, s.as_str()),
                (HEADER_TIMER, timer.as_str()),
                (HEADER_TIMER_SIGNATURE, ts.as_str()),
            ]);
            assert!(matches!(
                result,
                Err(CapabilityError::InvalidRequestSignature(_))
            ));
        }
    }

    #[test]
    fn test_missing_and_partial_headers() {
        assert!(
            RequestSignature::from_headers([("Accept", "*/*")])
                .unwrap()
                .is_none()
        );

        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"", NOW_MS);
        let pairs = header_pairs(&sig);
        let partial = pairs
            .iter()
            .take(3)
            .map(|(k, v)| (*k, v.as_str()));
        assert!(matches!(
            RequestSignature::from_headers(partial),
            Err(CapabilityError::InvalidRequestSignature(_))
        ));
    }

    #[test]
    fn test_non_numeric_timer_rejected() {
        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"", NOW_MS);
        let pk = sig.public_key.did();
        let s = sig.body_signature.to_base64();
        let ts = sig.timer_signature.to_base64();
        let result = RequestSignature::from_headers([
            (HEADER_PUBLIC_KEY, pk.as_str()),
            (HEADER_SIGNATURE, s.as_str()),
            (HEADER_TIMER, "soon"),
            (HEADER_TIMER_SIGNATURE, ts.as_str()),
        ]);
        assert!(matches!(
            result,
            Err(CapabilityError::InvalidRequestSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let (_, verifier) = verifier();
        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"original", NOW_MS);

        assert!(matches!(
            verifier.authenticate(&sig, b"tampered").await,
            Err(CapabilityError::InvalidRequestSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_timer_signature_must_match_timer() {
        let (_, verifier) = verifier();
        let key = KeyPair::generate();
        let mut sig = RequestSignature::sign(&key, b"x", NOW_MS);
        sig.timer_ms = NOW_MS + 1;
        sig.timer = sig.timer_ms.to_string();

        assert!(matches!(
            verifier.authenticate(&sig, b"x").await,
            Err(CapabilityError::InvalidRequestSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_skew_window() {
        let (_, verifier) = verifier();
        let verifier = verifier.with_max_skew_secs(60);
        let key = KeyPair::generate();

        let edge = RequestSignature::sign(&key, b"", NOW_MS - 60_000);
        assert!(verifier.authenticate(&edge, b"").await.is_ok());

        let stale = RequestSignature::sign(&key, b"", NOW_MS - 60_001);
        assert!(matches!(
            verifier.authenticate(&stale, b"").await,
            Err(CapabilityError::ClockSkew { .. })
        ));

        let future = RequestSignature::sign(&key, b"", NOW_MS + 120_000);
        assert!(matches!(
            verifier.authenticate(&future, b"").await,
            Err(CapabilityError::ClockSkew { .. })
        ));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let (_, verifier) = verifier();
        let verifier = verifier.with_max_body_bytes(4);
        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"12345", NOW_MS);

        assert!(matches!(
            verifier.authenticate(&sig, b"12345").await,
            Err(CapabilityError::InvalidRequestSignature(_))
        ));
    }

    #[tokio::test]
    async fn test_registered_key_lookup() {
        let keys = Arc::new(MemoryUserKeyStore::new());
        let (_, verifier) = verifier();
        let verifier = verifier.with_key_store(keys.clone());
        let key = KeyPair::generate();
        let sig = RequestSignature::sign(&key, b"{}", NOW_MS);

        assert!(matches!(
            verifier.authenticate_registered(&sig, b"{}").await,
            Err(CapabilityError::UnknownPublicKey(_))
        ));

        keys.register(key.export_public_key(), UserId::from("alice"))
            .unwrap();
        let auth = verifier.authenticate_registered(&sig, b"{}").await.unwrap();
        assert_eq!(auth.user, Some(UserId::from("alice")));
    }
}
