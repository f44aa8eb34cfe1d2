//! The server's issuing authority.
//!
//! An [`AuthorityContext`] owns the signing key and the settings that every
//! issue and verify path shares. Build it once at startup, either from
//! configuration or by hand, and hand out verifiers and authorizers from it.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use clusterdir_config::{AuthoritySection, Config};
use clusterdir_crypto::{KeyPair, PublicKey};
use tracing::{info, warn};

use crate::authorizer::RequestAuthorizer;
use crate::capability::{Capability, EmailAction};
use crate::clock::{Clock, SystemClock};
use crate::error::{CapabilityError, CapabilityResult};
use crate::principal::Principal;
use crate::revocation::{CachedRevocationCheck, NeverRevoked, RevocationCheck};
use crate::roles::{CapabilityStore, RoleCapabilityResolver, UserId, UserKeyStore};
use crate::routes::RouteTable;
use crate::session::SessionCookie;
use crate::signed_request::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_CLOCK_SKEW_SECS, SignedRequestVerifier,
};
use crate::token::TokenBuilder;
use crate::verifier::TokenVerifier;

const DEFAULT_SESSION_LIFETIME_SECS: u64 = 3600;
const DEFAULT_REVOCATION_CACHE_TTL: Duration = Duration::from_secs(60);
const DEFAULT_REVOCATION_CACHE_CAPACITY: usize = 1024;

/// A freshly issued session token and the cookie that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    /// Wire token.
    pub token: String,
    /// `Set-Cookie` header value.
    pub set_cookie: String,
    /// Token expiry, seconds since the epoch.
    pub expires_at: i64,
}

/// Signing key, trusted root and shared verification settings.
#[derive(Clone)]
pub struct AuthorityContext {
    signing_key: Option<Arc<KeyPair>>,
    root_issuer: Principal,
    clock: Arc<dyn Clock>,
    revocation: Arc<dyn RevocationCheck>,
    revocation_cache: (Duration, usize),
    routes: Arc<RouteTable>,
    cookie: SessionCookie,
    session_lifetime_secs: u64,
    delegation_lifetime_secs: u64,
    max_skew_secs: u64,
    max_body_bytes: usize,
    user_keys: Option<Arc<dyn UserKeyStore>>,
}

impl AuthorityContext {
    /// An authority that signs with `signing_key` and trusts only itself.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::RouteTable`] if the built-in route table
    /// fails validation.
    pub fn new(signing_key: KeyPair) -> CapabilityResult<Self> {
        let root_issuer = Principal::new(signing_key.did());
        let mut ctx = Self::verify_only(root_issuer)?;
        ctx.signing_key = Some(Arc::new(signing_key));
        Ok(ctx)
    }

    /// An authority without key material. It can verify tokens issued by
    /// `root_issuer` but every issue call fails.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::RouteTable`] if the built-in route table
    /// fails validation.
    pub fn verify_only(root_issuer: Principal) -> CapabilityResult<Self> {
        Ok(Self {
            signing_key: None,
            root_issuer,
            clock: Arc::new(SystemClock),
            revocation: Arc::new(NeverRevoked),
            revocation_cache: (
                DEFAULT_REVOCATION_CACHE_TTL,
                DEFAULT_REVOCATION_CACHE_CAPACITY,
            ),
            routes: Arc::new(RouteTable::builtin("/api")?),
            cookie: SessionCookie::default(),
            session_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
            delegation_lifetime_secs: DEFAULT_SESSION_LIFETIME_SECS,
            max_skew_secs: DEFAULT_MAX_CLOCK_SKEW_SECS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_keys: None,
        })
    }

    /// Build from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Configuration`] if key material cannot be
    /// loaded, neither a key nor a root issuer is configured, or the root
    /// issuer is not a valid `did:key`.
    pub fn from_config(config: &Config) -> CapabilityResult<Self> {
        let signing_key = load_signing_key(&config.authority)?;

        let root_issuer = match (&config.authority.root_issuer, &signing_key) {
            (Some(did), _) => {
                PublicKey::from_did(did).map_err(|e| {
                    CapabilityError::Configuration(format!("authority.root_issuer: {e}"))
                })?;
                Principal::new(did.as_str())
            },
            (None, Some(key)) => Principal::new(key.did()),
            (None, None) => {
                return Err(CapabilityError::Configuration(
                    "no signing key or root issuer configured".to_string(),
                ));
            },
        };

        if let Some(key) = &signing_key
            && root_issuer.as_str() != key.did()
        {
            warn!(
                root_issuer = %root_issuer,
                signing_key = %key.did(),
                "signing key is not the root issuer; tokens issued here will not be accepted"
            );
        }

        let session = &config.session;
        let routes = RouteTable::builtin(&config.routes.api_prefix)
            .map_err(|e| CapabilityError::Configuration(e.to_string()))?;

        let ctx = Self {
            signing_key: signing_key.map(Arc::new),
            root_issuer,
            clock: Arc::new(SystemClock),
            revocation: Arc::new(NeverRevoked),
            revocation_cache: (
                Duration::from_secs(config.revocation.cache_ttl_secs),
                config.revocation.cache_capacity,
            ),
            routes: Arc::new(routes),
            cookie: SessionCookie::new(session.cookie_name.as_str())
                .with_max_age_secs(session.cookie_max_age_secs)
                .with_secure(session.secure_cookie),
            session_lifetime_secs: session.token_lifetime_secs,
            delegation_lifetime_secs: session.delegation_lifetime_secs,
            max_skew_secs: config.signed_requests.max_clock_skew_secs,
            max_body_bytes: config.signed_requests.max_body_bytes,
            user_keys: None,
        };

        info!(
            root_issuer = %ctx.root_issuer,
            can_issue = ctx.signing_key.is_some(),
            "authority initialised"
        );
        Ok(ctx)
    }

    /// Use a different clock for issuing and verifying.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consult `revocation` as is, without caching.
    #[must_use]
    pub fn with_revocation(mut self, revocation: Arc<dyn RevocationCheck>) -> Self {
        self.revocation = revocation;
        self
    }

    /// Consult `store` through a TTL cache sized by the configuration.
    /// A zero TTL disables the cache.
    #[must_use]
    pub fn with_revocation_store<C: RevocationCheck + 'static>(mut self, store: C) -> Self {
        let (ttl, capacity) = self.revocation_cache;
        self.revocation = if ttl.is_zero() {
            Arc::new(store)
        } else {
            Arc::new(CachedRevocationCheck::new(store, ttl, capacity))
        };
        self
    }

    /// Replace the route table.
    #[must_use]
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = Arc::new(routes);
        self
    }

    /// Resolve signed-request keys to users through `keys`.
    #[must_use]
    pub fn with_user_keys(mut self, keys: Arc<dyn UserKeyStore>) -> Self {
        self.user_keys = Some(keys);
        self
    }

    /// Replace the session cookie settings.
    #[must_use]
    pub fn with_session_cookie(mut self, cookie: SessionCookie) -> Self {
        self.cookie = cookie;
        self
    }

    /// Lifetime of session tokens.
    #[must_use]
    pub fn with_session_lifetime_secs(mut self, secs: u64) -> Self {
        self.session_lifetime_secs = secs;
        self
    }

    /// The trusted root issuer.
    #[must_use]
    pub fn root_issuer(&self) -> &Principal {
        &self.root_issuer
    }

    /// The route table.
    #[must_use]
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// The session cookie settings.
    #[must_use]
    pub fn session_cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// The shared clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Whether this authority holds a signing key.
    #[must_use]
    pub fn can_issue(&self) -> bool {
        self.signing_key.is_some()
    }

    /// The server's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Configuration`] without a signing key.
    pub fn public_key(&self) -> CapabilityResult<PublicKey> {
        self.signing_key().map(|key| key.export_public_key())
    }

    fn signing_key(&self) -> CapabilityResult<&KeyPair> {
        self.signing_key.as_deref().ok_or_else(|| {
            CapabilityError::Configuration("no signing key configured".to_string())
        })
    }

    /// Issue a token for `audience` carrying `capabilities` (root if empty),
    /// valid for `lifetime_secs` from the authority's clock.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Configuration`] without a signing key or
    /// for a zero lifetime.
    pub fn issue(
        &self,
        audience: &Principal,
        lifetime_secs: u64,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> CapabilityResult<String> {
        let key = self.signing_key()?;
        TokenBuilder::new(audience.clone())
            .issued_at(self.clock.now())
            .lifetime_secs(lifetime_secs)
            .capabilities(capabilities)
            .random_nonce()
            .sign(key)
    }

    /// Issue a root session token for `audience` and its cookie.
    ///
    /// Used for registration, login and refresh alike.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_session(&self, audience: &Principal) -> CapabilityResult<SessionGrant> {
        let token = self.issue(audience, self.session_lifetime_secs, [Capability::root()])?;
        let set_cookie = self.cookie.set(&token)?;
        let expires_at = self
            .clock
            .now()
            .timestamp()
            .saturating_add(i64::try_from(self.session_lifetime_secs).unwrap_or(i64::MAX));
        info!(audience = %audience, expires_at, "session issued");
        Ok(SessionGrant {
            token,
            set_cookie,
            expires_at,
        })
    }

    /// Replace a still-valid session token with a fresh one.
    ///
    /// # Errors
    ///
    /// Returns the verification error if `current` is not a valid token from
    /// this authority, or an issue error.
    pub fn refresh_session(&self, current: &str) -> CapabilityResult<SessionGrant> {
        let token = self
            .verifier()
            .with_trusted_issuer(self.root_issuer.clone())
            .verify(current)?;
        self.issue_session(&token.audience)
    }

    /// Issue the narrow email grant: create, read and delete on the caller's
    /// own `mailto:` resource.
    ///
    /// # Errors
    ///
    /// See [`issue`](Self::issue).
    pub fn issue_email_delegation(&self, audience: &Principal) -> CapabilityResult<String> {
        let capabilities = EmailAction::ALL
            .into_iter()
            .map(|action| Capability::email(action, audience.as_str()));
        self.issue(audience, self.delegation_lifetime_secs, capabilities)
    }

    /// Issue a token carrying exactly the capabilities `user` holds through
    /// roles.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::CapabilityDenied`] when the user has no
    /// capabilities, since an empty set would otherwise mint a root token.
    pub async fn issue_for_user<S: CapabilityStore>(
        &self,
        audience: &Principal,
        user: &UserId,
        resolver: &RoleCapabilityResolver<S>,
    ) -> CapabilityResult<String> {
        let capabilities = resolver.capabilities_for_user(user).await?;
        if capabilities.is_empty() {
            return Err(CapabilityError::CapabilityDenied {
                required: format!("any role capability for user {user}"),
            });
        }
        self.issue(audience, self.session_lifetime_secs, capabilities)
    }

    /// A token verifier sharing this authority's clock and revocation hook.
    #[must_use]
    pub fn verifier(&self) -> TokenVerifier {
        TokenVerifier::new()
            .with_clock(self.clock.clone())
            .with_revocation(self.revocation.clone())
    }

    /// A signed-request verifier with the configured window and key store.
    #[must_use]
    pub fn signed_request_verifier(&self) -> SignedRequestVerifier {
        let verifier = SignedRequestVerifier::new()
            .with_clock(self.clock.clone())
            .with_max_skew_secs(self.max_skew_secs)
            .with_max_body_bytes(self.max_body_bytes);
        match &self.user_keys {
            Some(keys) => verifier.with_key_store(keys.clone()),
            None => verifier,
        }
    }

    /// A request authorizer over this authority's route table.
    #[must_use]
    pub fn authorizer(&self) -> RequestAuthorizer {
        RequestAuthorizer::new(
            self.verifier(),
            self.signed_request_verifier(),
            self.root_issuer.clone(),
            self.routes.clone(),
        )
    }

    /// Expiry of a token issued now with the session lifetime.
    #[must_use]
    pub fn session_expiry(&self) -> Option<DateTime<chrono::Utc>> {
        let secs = i64::try_from(self.session_lifetime_secs).ok()?;
        self.clock
            .now()
            .checked_add_signed(chrono::Duration::try_seconds(secs)?)
    }
}

fn load_signing_key(authority: &AuthoritySection) -> CapabilityResult<Option<KeyPair>> {
    if let Some(encoded) = &authority.secret_key {
        return KeyPair::from_encoded_secret(encoded)
            .map(Some)
            .map_err(|e| CapabilityError::Configuration(format!("authority.secret_key: {e}")));
    }
    if let Some(path) = &authority.secret_key_path {
        return KeyPair::load(path).map(Some).map_err(|e| {
            CapabilityError::Configuration(format!(
                "authority.secret_key_path {}: {e}",
                path.display()
            ))
        });
    }
    Ok(None)
}

impl std::fmt::Debug for AuthorityContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorityContext")
            .field("root_issuer", &self.root_issuer)
            .field("can_issue", &self.signing_key.is_some())
            .field("routes", &self.routes.rules().len())
            .field("session_lifetime_secs", &self.session_lifetime_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::{Decision, DenyReason};
    use crate::clock::FixedClock;
    use crate::revocation::MemoryRevocationList;
    use crate::roles::{CapabilityId, MemoryCapabilityStore, RoleId};
    use crate::routes::Method;
    use crate::token::{Token, TokenId};

    fn key_hex(seed: u8) -> String {
        hex::encode([seed; 32])
    }

    fn fixed() -> Arc<FixedClock> {
        Arc::new(FixedClock::at_unix(1_750_000_000))
    }

    #[test]
    fn test_from_config_with_key() {
        let mut config = Config::default();
        config.authority.secret_key = Some(key_hex(7));

        let ctx = AuthorityContext::from_config(&config).unwrap();
        let expected = KeyPair::from_secret_key(&[7u8; 32]).unwrap().did();
        assert_eq!(ctx.root_issuer().as_str(), expected);
        assert!(ctx.can_issue());
    }

    #[test]
    fn test_from_config_without_anything() {
        let result = AuthorityContext::from_config(&Config::default());
        assert!(matches!(result, Err(CapabilityError::Configuration(_))));
    }

    #[test]
    fn test_from_config_verify_only() {
        let mut config = Config::default();
        config.authority.root_issuer = Some(KeyPair::generate().did());

        let ctx = AuthorityContext::from_config(&config).unwrap();
        assert!(!ctx.can_issue());
        let result = ctx.issue(&Principal::new("did:key:zABC"), 60, []);
        assert!(matches!(result, Err(CapabilityError::Configuration(_))));
    }

    #[test]
    fn test_from_config_bad_key() {
        let mut config = Config::default();
        config.authority.secret_key = Some("not-a-key".to_string());
        let result = AuthorityContext::from_config(&config);
        assert!(matches!(result, Err(CapabilityError::Configuration(_))));

        let mut config = Config::default();
        config.authority.root_issuer = Some("did:key:zzzz".to_string());
        let result = AuthorityContext::from_config(&config);
        assert!(matches!(result, Err(CapabilityError::Configuration(_))));
    }

    #[test]
    fn test_from_config_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.key");
        let generated = KeyPair::load_or_generate(&path).unwrap();

        let mut config = Config::default();
        config.authority.secret_key_path = Some(path);
        let ctx = AuthorityContext::from_config(&config).unwrap();
        assert_eq!(ctx.root_issuer().as_str(), generated.did());
    }

    #[test]
    fn test_session_grant() {
        let clock = fixed();
        let ctx = AuthorityContext::new(KeyPair::generate())
            .unwrap()
            .with_clock(clock.clone());
        let audience = Principal::new("did:key:zABC");

        let grant = ctx.issue_session(&audience).unwrap();
        assert!(grant.set_cookie.starts_with("ucan_token="));
        assert_eq!(grant.expires_at, 1_750_000_000 + 3600);

        let token = Token::decode(&grant.token).unwrap();
        assert_eq!(token.issued_at, 1_750_000_000);
        assert_eq!(token.capabilities, vec![Capability::root()]);
        assert_eq!(
            ctx.session_expiry().map(|t| t.timestamp()),
            Some(grant.expires_at)
        );
    }

    #[test]
    fn test_refresh_session() {
        let clock = fixed();
        let ctx = AuthorityContext::new(KeyPair::generate())
            .unwrap()
            .with_clock(clock.clone());
        let audience = Principal::new("did:key:zABC");
        let first = ctx.issue_session(&audience).unwrap();

        clock.advance(chrono::Duration::seconds(1800));
        let refreshed = ctx.refresh_session(&first.token).unwrap();
        assert_eq!(refreshed.expires_at, first.expires_at + 1800);

        clock.advance(chrono::Duration::seconds(7200));
        assert!(ctx.refresh_session(&refreshed.token).is_err());

        let foreign = AuthorityContext::new(KeyPair::generate())
            .unwrap()
            .with_clock(clock.clone())
            .issue_session(&audience)
            .unwrap();
        assert!(ctx.refresh_session(&foreign.token).is_err());
    }

    #[test]
    fn test_email_delegation() {
        let ctx = AuthorityContext::new(KeyPair::generate()).unwrap();
        let audience = Principal::new("did:key:zABC");

        let wire = ctx.issue_email_delegation(&audience).unwrap();
        let token = Token::decode(&wire).unwrap();
        assert_eq!(token.capabilities.len(), 3);
        assert!(token.grants(&Capability::email(EmailAction::Delete, "did:key:zABC")));
        assert!(!token.grants(&Capability::email(EmailAction::Read, "did:key:zOTHER")));
        assert!(!token.capabilities.iter().any(Capability::is_root));
    }

    #[tokio::test]
    async fn test_issue_for_user() {
        let ctx = AuthorityContext::new(KeyPair::generate()).unwrap();
        let store = MemoryCapabilityStore::new();
        let cap = Capability::new("api", "/clusters", "clusters", ["POST"]);
        store.insert_capability(CapabilityId(1), cap.clone()).unwrap();
        store.grant_to_role(RoleId(1), CapabilityId(1)).unwrap();
        store.assign_role(UserId::from("alice"), RoleId(1)).unwrap();
        let resolver = RoleCapabilityResolver::new(store);
        let audience = Principal::new("did:key:zABC");

        let wire = ctx
            .issue_for_user(&audience, &UserId::from("alice"), &resolver)
            .await
            .unwrap();
        assert_eq!(Token::decode(&wire).unwrap().capabilities, vec![cap]);

        let nobody = ctx
            .issue_for_user(&audience, &UserId::from("bob"), &resolver)
            .await;
        assert!(matches!(nobody, Err(CapabilityError::CapabilityDenied { .. })));
    }

    #[tokio::test]
    async fn test_revoked_session_denied() {
        let revoked = Arc::new(MemoryRevocationList::new());
        let ctx = AuthorityContext::new(KeyPair::generate())
            .unwrap()
            .with_revocation(revoked.clone());
        let grant = ctx.issue_session(&Principal::new("did:key:zABC")).unwrap();
        let authorizer = ctx.authorizer();

        let before = authorizer
            .authorize(Some(&grant.token), Method::Post, "/api/clusters", false)
            .await;
        assert!(before.is_allowed());

        revoked.revoke(TokenId::of_wire(&grant.token)).unwrap();
        let after = authorizer
            .authorize(Some(&grant.token), Method::Post, "/api/clusters", false)
            .await;
        assert_eq!(after, Decision::Deny(DenyReason::CapabilityDenied));
    }
}
