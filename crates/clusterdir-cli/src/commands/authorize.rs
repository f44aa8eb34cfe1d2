//! Authorize command: dry-run a request through the authorizer.

use clusterdir_capabilities::{Access, AuthRequest, AuthorityContext, Decision, Method};
use clusterdir_config::Config;
use clusterdir_telemetry::{RequestContext, RequestGuard};

use crate::theme::Theme;

/// Show the matching rule and the decision for a request.
pub(crate) async fn show_decision(
    config: &Config,
    method: Method,
    path: &str,
    token: Option<&str>,
) -> anyhow::Result<()> {
    let authority = AuthorityContext::from_config(config)?;
    let authorizer = authority.authorizer();

    println!("\n{}", Theme::header(&format!("{method} {path}")));
    match authorizer.routes().lookup(method, path) {
        Some(rule) => {
            println!("{}", Theme::kv("Rule", &rule.pattern));
            println!("{}", Theme::kv("Access", &super::routes::describe_access(rule)));
            if rule.access == Access::SignedRequest {
                println!(
                    "{}",
                    Theme::info("Needs signed-request headers, which this command cannot send.")
                );
            }
        },
        None => println!("{}", Theme::warning("No rule matches; the request is refused.")),
    }

    let guard = RequestGuard::new(RequestContext::new(method.as_str(), path));
    let request = AuthRequest::new(method, path).with_token(token);
    match authorizer.authorize_request(&request).await {
        Decision::Allow { principal } => {
            if let Some(p) = &principal {
                guard.record_principal(p.as_str());
            }
            guard.record_status(200);
            let who = principal.map_or_else(|| "anonymous".to_string(), |p| p.to_string());
            println!("{}", Theme::success(&format!("Allowed ({who})")));
        },
        Decision::Deny(reason) => {
            guard.record_status(reason.http_status());
            println!(
                "{}",
                Theme::error(&format!("Denied: {reason:?} (HTTP {})", reason.http_status()))
            );
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_show_decision_needs_root_issuer() {
        assert!(
            show_decision(&Config::default(), Method::Get, "/api/clusters", None)
                .await
                .is_err()
        );

        let mut config = Config::default();
        config.authority.root_issuer = Some(clusterdir_crypto::KeyPair::generate().did());
        show_decision(&config, Method::Delete, "/api/clusters/c1", Some("not-a-token"))
            .await
            .unwrap();
    }
}
