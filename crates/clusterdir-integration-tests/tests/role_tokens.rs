//! Tokens minted from role assignments carry exactly the resolved grants.

use clusterdir_capabilities::{
    CapabilityError, Decision, DenyReason, Method, RoleCapabilityResolver, UserId,
};
use clusterdir_test::prelude::*;

#[tokio::test]
async fn editor_token_is_limited_to_cluster_writes() {
    init_test_logging();
    let t = test_authority();
    let resolver = RoleCapabilityResolver::new(seeded_capability_store());
    let alice = test_principal(10);

    let token = t
        .authority
        .issue_for_user(&alice, &UserId::from("alice"), &resolver)
        .await
        .unwrap();
    let authorizer = t.authority.authorizer();

    for (method, path) in [
        (Method::Post, "/api/clusters"),
        (Method::Put, "/api/clusters/c1"),
        (Method::Delete, "/api/clusters/c1"),
    ] {
        assert_eq!(
            authorizer.authorize(Some(&token), method, path, false).await,
            Decision::Allow {
                principal: Some(alice.clone())
            },
            "{method} {path}"
        );
    }

    for (method, path) in [
        (Method::Post, "/api/clusters/c1/nodes"),
        (Method::Get, "/api/admin/capabilities"),
        (Method::Get, "/api/users"),
    ] {
        assert_eq!(
            authorizer.authorize(Some(&token), method, path, false).await,
            Decision::Deny(DenyReason::CapabilityDenied),
            "{method} {path}"
        );
    }
}

#[tokio::test]
async fn admin_role_reaches_admin_routes() {
    let t = test_authority();
    let resolver = RoleCapabilityResolver::new(seeded_capability_store());
    let bob = test_principal(11);

    let token = t
        .authority
        .issue_for_user(&bob, &UserId::from("bob"), &resolver)
        .await
        .unwrap();
    let authorizer = t.authority.authorizer();

    assert!(
        authorizer
            .authorize(Some(&token), Method::Get, "/api/admin/capabilities", false)
            .await
            .is_allowed()
    );
    assert!(
        authorizer
            .authorize(Some(&token), Method::Post, "/api/admin/capabilities", false)
            .await
            .is_allowed()
    );
    assert!(
        !authorizer
            .authorize(Some(&token), Method::Post, "/api/admin/roles", false)
            .await
            .is_allowed()
    );

    let decoded = t.authority.verifier().verify(&token).unwrap();
    assert_eq!(decoded.capabilities.len(), 5);
    assert!(decoded.capabilities.iter().all(|c| !c.is_root()));
}

#[tokio::test]
async fn user_without_roles_gets_no_token() {
    let t = test_authority();
    let resolver = RoleCapabilityResolver::new(seeded_capability_store());

    let result = t
        .authority
        .issue_for_user(&test_principal(12), &UserId::from("carol"), &resolver)
        .await;
    assert!(matches!(result, Err(CapabilityError::CapabilityDenied { .. })));
}

#[tokio::test]
async fn role_token_is_bound_to_its_audience() {
    let t = test_authority();
    let resolver = RoleCapabilityResolver::new(seeded_capability_store());
    let token = t
        .authority
        .issue_for_user(&test_principal(10), &UserId::from("alice"), &resolver)
        .await
        .unwrap();
    let required = t
        .authority
        .routes()
        .derive_required_capability(Method::Post, "/api/clusters")
        .unwrap();

    let verifier = t.authority.verifier();
    assert!(
        verifier
            .verify_capability(&token, &test_principal(10), t.root(), &required)
            .await
    );
    assert!(matches!(
        verifier
            .check_capability(&token, &test_principal(13), t.root(), &required)
            .await,
        Err(CapabilityError::AudienceMismatch { .. })
    ));
}
