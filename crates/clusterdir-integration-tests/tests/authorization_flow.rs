//! End-to-end authorization of session tokens against the route table.
//!
//! Covers the request scenarios (root session, narrow grant, missing token,
//! expiry) plus tamper detection, admin namespace isolation, foreign
//! issuers and revocation.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;

use async_trait::async_trait;
use clusterdir_capabilities::{
    AuthRequest, Capability, CapabilityError, CapabilityResult, Decision, DenyReason,
    EmailAction, Method, Principal, RevocationCheck, TokenBuilder, TokenId,
};
use clusterdir_test::prelude::*;

fn zabc() -> Principal {
    Principal::new("did:key:zABC")
}

#[tokio::test]
async fn root_session_allows_cluster_creation() {
    init_test_logging();
    let t = test_authority();
    let token = t.authority.issue(&zabc(), 3600, []).unwrap();

    let decision = t
        .authority
        .authorizer()
        .authorize(Some(&token), Method::Post, "/api/clusters", false)
        .await;

    assert_eq!(
        decision,
        Decision::Allow {
            principal: Some(zabc())
        }
    );
}

#[tokio::test]
async fn email_grant_cannot_create_clusters() {
    init_test_logging();
    let t = test_authority();
    let token = t
        .authority
        .issue(&zabc(), 3600, [Capability::email(EmailAction::Read, "did:key:zABC")])
        .unwrap();

    let decision = t
        .authority
        .authorizer()
        .authorize(Some(&token), Method::Post, "/api/clusters", false)
        .await;

    assert_eq!(decision, Decision::Deny(DenyReason::CapabilityDenied));
    assert_eq!(decision.deny_reason().map(DenyReason::http_status), Some(403));
}

#[tokio::test]
async fn missing_token_is_refused_only_on_protected_routes() {
    let t = test_authority();
    let authorizer = t.authority.authorizer();

    let protected = authorizer
        .authorize_request(&AuthRequest::new(Method::Post, "/api/clusters"))
        .await;
    assert_eq!(protected, Decision::Deny(DenyReason::NoToken));

    let public = authorizer
        .authorize_request(&AuthRequest::new(Method::Get, "/api/clusters"))
        .await;
    assert_eq!(public, Decision::Allow { principal: None });
}

#[tokio::test]
async fn public_route_attaches_principal_of_valid_token() {
    let t = test_authority();
    let token = t.authority.issue(&zabc(), 3600, []).unwrap();

    let decision = t
        .authority
        .authorizer()
        .authorize_request(&AuthRequest::new(Method::Get, "/api/clusters/c1").with_token(Some(&token)))
        .await;
    assert_eq!(decision.principal(), Some(&zabc()));
}

#[tokio::test]
async fn expired_token_reads_as_invalid() {
    let t = test_authority();
    let token = t.authority.issue(&zabc(), 3600, []).unwrap();
    let authorizer = t.authority.authorizer();

    t.clock.advance(chrono::Duration::seconds(3599));
    assert!(
        authorizer
            .authorize(Some(&token), Method::Post, "/api/clusters", false)
            .await
            .is_allowed()
    );

    t.clock.advance(chrono::Duration::seconds(2));
    let decision = authorizer
        .authorize(Some(&token), Method::Post, "/api/clusters", false)
        .await;
    assert_eq!(decision, Decision::Deny(DenyReason::InvalidToken));
}

#[test]
fn expiry_boundary_on_verify() {
    let t = test_authority();
    let verifier = t.authority.verifier();
    let key = test_keypair(ROOT_SEED);
    let now = chrono::DateTime::from_timestamp(TEST_EPOCH, 0).unwrap();

    let stale = TokenBuilder::new(zabc())
        .issued_at(now - chrono::Duration::seconds(3601))
        .lifetime_secs(3600)
        .sign(&key)
        .unwrap();
    assert_eq!(verifier.verify_signature_and_expiry(&stale), None);

    let fresh = TokenBuilder::new(zabc())
        .issued_at(now)
        .lifetime_secs(3600)
        .sign(&key)
        .unwrap();
    assert_eq!(verifier.verify_signature_and_expiry(&fresh), Some(zabc()));
}

#[test]
fn any_payload_change_breaks_the_token() {
    let t = test_authority();
    let token = t.authority.issue(&zabc(), 3600, []).unwrap();
    let verifier = t.authority.verifier();
    assert!(verifier.verify_signature_and_expiry(&token).is_some());

    let start = token.find('.').unwrap() + 1;
    let end = token.rfind('.').unwrap();
    for i in start..end {
        let mut bytes = token.clone().into_bytes();
        bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();
        assert_eq!(
            verifier.verify_signature_and_expiry(&tampered),
            None,
            "payload byte {i} changed without detection"
        );
    }
}

#[test]
fn decoded_token_matches_what_was_issued() {
    let t = test_authority();
    let grant = Capability::new("api", "/clusters/*", "clusters", ["PUT", "DELETE"]);
    let token = t.authority.issue(&zabc(), 600, [grant.clone()]).unwrap();

    let decoded = t.authority.verifier().verify(&token).unwrap();
    assert_eq!(decoded.issuer, test_principal(ROOT_SEED));
    assert_eq!(decoded.audience, zabc());
    assert_eq!(decoded.issued_at, TEST_EPOCH);
    assert_eq!(decoded.expires_at, TEST_EPOCH + 600);
    assert_eq!(decoded.capabilities, vec![grant]);
    assert_eq!(decoded.id, TokenId::of_wire(&token));
}

#[tokio::test]
async fn plain_and_admin_namespaces_never_cross() {
    let t = test_authority();
    let authorizer = t.authority.authorizer();

    // Right path, plain namespace.
    let plain = t
        .authority
        .issue(
            &zabc(),
            3600,
            [Capability::new("api", "/admin/capabilities", "capabilities", ["*"])],
        )
        .unwrap();
    assert_eq!(
        authorizer
            .authorize(Some(&plain), Method::Get, "/api/admin/capabilities", false)
            .await,
        Decision::Deny(DenyReason::CapabilityDenied)
    );

    // Admin namespace on a plain resource.
    let admin = t
        .authority
        .issue(
            &zabc(),
            3600,
            [Capability::new("api", "/clusters", "admin-clusters", ["*"])],
        )
        .unwrap();
    assert_eq!(
        authorizer
            .authorize(Some(&admin), Method::Post, "/api/clusters", false)
            .await,
        Decision::Deny(DenyReason::CapabilityDenied)
    );

    let required = t
        .authority
        .routes()
        .derive_required_capability(Method::Get, "/api/admin/capabilities")
        .unwrap();
    assert_eq!(required.namespace, "admin-capabilities");
    assert!(!Capability::new("api", "/admin/capabilities", "capabilities", ["GET"]).satisfies(&required));
    assert!(Capability::root().satisfies(&required));
}

#[tokio::test]
async fn tokens_from_other_issuers_are_refused() {
    let t = test_authority();
    let foreign = TokenBuilder::new(zabc())
        .issued_at(chrono::DateTime::from_timestamp(TEST_EPOCH, 0).unwrap())
        .lifetime_secs(3600)
        .capability(Capability::root())
        .sign(&test_keypair(7))
        .unwrap();

    let decision = t
        .authority
        .authorizer()
        .authorize(Some(&foreign), Method::Post, "/api/clusters", false)
        .await;
    assert_eq!(decision, Decision::Deny(DenyReason::InvalidToken));
    assert_eq!(decision.deny_reason().map(DenyReason::http_status), Some(401));

    assert!(matches!(
        t.authority.refresh_session(&foreign),
        Err(CapabilityError::IssuerNotTrusted { .. })
    ));
}

#[tokio::test]
async fn public_route_ignores_foreign_issuer_tokens() {
    let t = test_authority();
    let victim = test_principal(9);
    let forged = TokenBuilder::new(victim.clone())
        .issued_at(chrono::DateTime::from_timestamp(TEST_EPOCH, 0).unwrap())
        .lifetime_secs(3600)
        .capability(Capability::root())
        .sign(&test_keypair(66))
        .unwrap();
    let authorizer = t.authority.authorizer();

    for path in ["/api/clusters/abc", "/api/clusters/abc/schema"] {
        let decision = authorizer
            .authorize_request(&AuthRequest::new(Method::Get, path).with_token(Some(&forged)))
            .await;
        assert_eq!(decision, Decision::Allow { principal: None }, "{path}");
    }

    // The same audience with a root-issued token is attached.
    let genuine = t.authority.issue(&victim, 3600, []).unwrap();
    let decision = authorizer
        .authorize_request(
            &AuthRequest::new(Method::Get, "/api/clusters/abc").with_token(Some(&genuine)),
        )
        .await;
    assert_eq!(decision.principal(), Some(&victim));
}

#[tokio::test]
async fn unlisted_routes_fail_closed() {
    let t = test_authority();
    let token = t.authority.issue(&zabc(), 3600, []).unwrap();
    let authorizer = t.authority.authorizer();

    for (method, path) in [
        (Method::Post, "/api/secrets"),
        (Method::Get, "/api/clusters/../admin/capabilities"),
        (Method::Post, "/elsewhere/clusters"),
    ] {
        assert_eq!(
            authorizer.authorize(Some(&token), method, path, false).await,
            Decision::Deny(DenyReason::CapabilityDenied),
            "{method} {path}"
        );
    }
}

#[tokio::test]
async fn revoked_tokens_are_denied() {
    let t = test_authority();
    let token = t.authority.issue(&zabc(), 3600, []).unwrap();
    let authorizer = t.authority.authorizer();

    assert!(
        authorizer
            .authorize(Some(&token), Method::Post, "/api/clusters", false)
            .await
            .is_allowed()
    );

    t.revocations.revoke(TokenId::of_wire(&token)).unwrap();
    assert_eq!(
        authorizer
            .authorize(Some(&token), Method::Post, "/api/clusters", false)
            .await,
        Decision::Deny(DenyReason::CapabilityDenied)
    );
}

struct UnreachableStore;

#[async_trait]
impl RevocationCheck for UnreachableStore {
    async fn is_revoked(&self, _token: &TokenId) -> CapabilityResult<bool> {
        Err(CapabilityError::Storage("connection refused".to_string()))
    }
}

#[tokio::test]
async fn revocation_errors_deny() {
    let t = test_authority();
    let authority = t.authority.with_revocation(Arc::new(UnreachableStore));
    let token = authority.issue(&zabc(), 3600, []).unwrap();

    let decision = authority
        .authorizer()
        .authorize(Some(&token), Method::Post, "/api/clusters", false)
        .await;
    assert_eq!(decision, Decision::Deny(DenyReason::CapabilityDenied));
}

#[test]
fn route_table_covers_served_routes() {
    let t = test_authority();
    let routes = t.authority.routes();
    let served: Vec<(Method, String)> = routes
        .rules()
        .iter()
        .map(|rule| (rule.method, rule.pattern.clone()))
        .collect();

    routes
        .ensure_covers(served.iter().map(|(m, p)| (*m, p.as_str())))
        .unwrap();
    assert!(matches!(
        routes.ensure_covers([(Method::Post, "/clusters/{id}/archive")]),
        Err(CapabilityError::RouteTable(_))
    ));
}
