//! Request-time authorization.
//!
//! [`RequestAuthorizer::authorize`] is the decision procedure for token
//! routes. [`RequestAuthorizer::authorize_request`] puts it behind the route
//! table and adds the signed-request path.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CapabilityError;
use crate::principal::Principal;
use crate::routes::{Access, Method, RouteTable};
use crate::signed_request::{RequestSignature, SignedRequestVerifier};
use crate::verifier::TokenVerifier;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Nothing presented on a protected route.
    NoToken,
    /// Credentials failed to verify.
    InvalidToken,
    /// Token past its expiry. Logged only; clients see [`InvalidToken`](Self::InvalidToken).
    Expired,
    /// Authenticated, but without the required capability.
    CapabilityDenied,
}

impl DenyReason {
    /// What the client is told.
    #[must_use]
    pub const fn client_facing(self) -> Self {
        match self {
            Self::Expired => Self::InvalidToken,
            other => other,
        }
    }

    /// HTTP status: 403 for missing rights, 401 for everything else.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::CapabilityDenied => 403,
            Self::NoToken | Self::InvalidToken | Self::Expired => 401,
        }
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead. `principal` is `None` on public routes without credentials.
    Allow {
        /// Authenticated caller.
        principal: Option<Principal>,
    },
    /// Refuse.
    Deny(DenyReason),
}

impl Decision {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// The authenticated caller, if any.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Self::Allow { principal } => principal.as_ref(),
            Self::Deny(_) => None,
        }
    }

    /// The deny reason, if refused.
    #[must_use]
    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Self::Allow { .. } => None,
            Self::Deny(reason) => Some(*reason),
        }
    }
}

/// One incoming request, as seen by the authorizer.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    /// HTTP method.
    pub method: Method,
    /// Request path, including the API prefix.
    pub path: &'a str,
    /// Session token from the cookie, if any.
    pub token: Option<&'a str>,
    /// Signature headers, if any.
    pub signature: Option<&'a RequestSignature>,
    /// Raw body, for signature checks.
    pub body: &'a [u8],
}

impl<'a> AuthRequest<'a> {
    /// A body-less request.
    #[must_use]
    pub fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            token: None,
            signature: None,
            body: &[],
        }
    }

    /// Attach a session token.
    #[must_use]
    pub fn with_token(mut self, token: Option<&'a str>) -> Self {
        self.token = token;
        self
    }

    /// Attach signature headers and the body they cover.
    #[must_use]
    pub fn with_signature(mut self, signature: &'a RequestSignature, body: &'a [u8]) -> Self {
        self.signature = Some(signature);
        self.body = body;
        self
    }
}

/// Maps requests to allow/deny decisions.
#[derive(Debug, Clone)]
pub struct RequestAuthorizer {
    verifier: TokenVerifier,
    signed: SignedRequestVerifier,
    root_issuer: Principal,
    routes: Arc<RouteTable>,
}

impl RequestAuthorizer {
    /// Create an authorizer trusting tokens issued by `root_issuer`.
    ///
    /// `verifier` is pinned to `root_issuer`, so a token signed by any other
    /// key never authenticates, on public routes included.
    #[must_use]
    pub fn new(
        verifier: TokenVerifier,
        signed: SignedRequestVerifier,
        root_issuer: Principal,
        routes: Arc<RouteTable>,
    ) -> Self {
        Self {
            verifier: verifier.with_trusted_issuer(root_issuer.clone()),
            signed,
            root_issuer,
            routes,
        }
    }

    /// The route table.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Decide a token-governed request.
    ///
    /// Public routes are always allowed, with a principal only when the token
    /// was issued by the root issuer. Otherwise the token must verify against
    /// the root issuer and carry a capability satisfying the one the route table derives for
    /// `method` and `path`. Routes without a capability rule are denied.
    /// Expired tokens are reported as [`DenyReason::InvalidToken`].
    pub async fn authorize(
        &self,
        token: Option<&str>,
        method: Method,
        path: &str,
        public: bool,
    ) -> Decision {
        if public {
            let principal = token.and_then(|t| self.verifier.verify_signature_and_expiry(t));
            return Decision::Allow { principal };
        }

        let Some(wire) = token else {
            return self.deny(DenyReason::NoToken, method, path);
        };

        let token = match self.verifier.verify(wire) {
            Ok(token) => token,
            Err(CapabilityError::TokenExpired { .. }) => {
                return self.deny(DenyReason::Expired, method, path);
            },
            Err(_) => return self.deny(DenyReason::InvalidToken, method, path),
        };
        let principal = token.audience;

        let Some(required) = self.routes.derive_required_capability(method, path) else {
            warn!(%method, path, %principal, "no capability rule for route");
            return self.deny(DenyReason::CapabilityDenied, method, path);
        };

        if self
            .verifier
            .verify_capability(wire, &principal, &self.root_issuer, &required)
            .await
        {
            debug!(%method, path, %principal, "request allowed");
            Decision::Allow {
                principal: Some(principal),
            }
        } else {
            self.deny(DenyReason::CapabilityDenied, method, path)
        }
    }

    /// Decide a request using the route table's access mode for it.
    pub async fn authorize_request(&self, request: &AuthRequest<'_>) -> Decision {
        let access = self
            .routes
            .lookup(request.method, request.path)
            .map(|rule| rule.access.clone());

        match access {
            Some(Access::Public) => {
                self.authorize(request.token, request.method, request.path, true)
                    .await
            },
            Some(Access::Capability { .. }) | None => {
                self.authorize(request.token, request.method, request.path, false)
                    .await
            },
            Some(Access::SignedRequest) => {
                let Some(signature) = request.signature else {
                    return self.deny(DenyReason::NoToken, request.method, request.path);
                };
                match self.signed.authenticate(signature, request.body).await {
                    Ok(authenticated) => Decision::Allow {
                        principal: Some(authenticated.principal),
                    },
                    Err(error) => {
                        debug!(%error, "signed request rejected");
                        self.deny(DenyReason::InvalidToken, request.method, request.path)
                    },
                }
            },
        }
    }

    fn deny(&self, reason: DenyReason, method: Method, path: &str) -> Decision {
        info!(%method, path, reason = ?reason, "request denied");
        Decision::Deny(reason.client_facing())
    }
}
