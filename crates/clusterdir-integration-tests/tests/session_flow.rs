//! Cookie-carried sessions: login, use, refresh and logout.

#![allow(clippy::arithmetic_side_effects)]

use clusterdir_capabilities::{
    AuthRequest, Capability, Decision, DenyReason, EmailAction, Method, SessionCookie,
};
use clusterdir_test::prelude::*;

#[tokio::test]
async fn cookie_session_round_trip() {
    init_test_logging();
    let t = test_authority();
    let user = test_principal(20);
    let grant = t.authority.issue_session(&user).unwrap();

    assert!(grant.set_cookie.starts_with(&format!("ucan_token={}", grant.token)));
    assert!(grant.set_cookie.contains("Max-Age=86400"));
    assert!(grant.set_cookie.contains("HttpOnly"));
    assert!(grant.set_cookie.contains("SameSite=Strict"));
    assert!(grant.set_cookie.contains("Secure"));
    assert_eq!(grant.expires_at, TEST_EPOCH + 3600);

    // The browser sends it back with other cookies.
    let header = format!("theme=dark; ucan_token={}; lang=en", grant.token);
    let cookie = t.authority.session_cookie();
    let presented = cookie.extract(&header);
    assert_eq!(presented, Some(grant.token.as_str()));

    let decision = t
        .authority
        .authorizer()
        .authorize_request(&AuthRequest::new(Method::Post, "/api/clusters").with_token(presented))
        .await;
    assert_eq!(
        decision,
        Decision::Allow {
            principal: Some(user)
        }
    );
}

#[tokio::test]
async fn refresh_extends_an_ageing_session() {
    let t = test_authority();
    let user = test_principal(20);
    let grant = t.authority.issue_session(&user).unwrap();
    let authorizer = t.authority.authorizer();

    t.clock.advance(chrono::Duration::seconds(3000));
    let refreshed = t.authority.refresh_session(&grant.token).unwrap();
    assert_ne!(refreshed.token, grant.token);
    assert_eq!(refreshed.expires_at, TEST_EPOCH + 3000 + 3600);

    t.clock.advance(chrono::Duration::seconds(1000));
    assert_eq!(
        authorizer
            .authorize(Some(&grant.token), Method::Post, "/api/clusters", false)
            .await,
        Decision::Deny(DenyReason::InvalidToken)
    );
    assert!(
        authorizer
            .authorize(Some(&refreshed.token), Method::Post, "/api/clusters", false)
            .await
            .is_allowed()
    );

    // Too late to refresh the original.
    assert!(t.authority.refresh_session(&grant.token).is_err());
}

#[test]
fn logout_clears_the_cookie() {
    let cookie = SessionCookie::default().with_secure(false);
    let cleared = cookie.clear();
    assert!(cleared.starts_with("ucan_token=;"));
    assert!(cleared.contains("Max-Age=0"));
    assert!(!cleared.contains("Secure"));
    assert_eq!(cookie.extract("ucan_token="), None);
}

#[tokio::test]
async fn email_delegation_is_scoped_to_the_caller() {
    let t = test_authority();
    let user = test_principal(21);
    let token = t.authority.issue_email_delegation(&user).unwrap();

    let decoded = t.authority.verifier().verify(&token).unwrap();
    assert_eq!(decoded.capabilities.len(), 3);
    for action in EmailAction::ALL {
        assert!(decoded.grants(&Capability::email(action, user.as_str())));
    }
    assert!(!decoded.grants(&Capability::email(EmailAction::Read, "did:key:zOther")));

    assert_eq!(
        t.authority
            .authorizer()
            .authorize(Some(&token), Method::Post, "/api/clusters", false)
            .await,
        Decision::Deny(DenyReason::CapabilityDenied)
    );
}
