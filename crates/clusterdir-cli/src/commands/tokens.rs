//! Token commands: issue, inspect and verify capability tokens.

use chrono::{DateTime, Utc};
use clusterdir_capabilities::{
    AuthorityContext, Capability, CapabilityError, Principal, Token, VerificationStage,
};
use clusterdir_config::Config;

use crate::theme::Theme;

/// Parse a `--can` value written `with#can`, e.g. `api:/clusters/*#clusters/PUT`.
pub(crate) fn parse_capability(value: &str) -> Result<Capability, String> {
    let (with, can) = value
        .split_once('#')
        .ok_or_else(|| format!("expected `with#can`, got `{value}`"))?;
    Capability::parse(with, can).map_err(|e| e.to_string())
}

fn signing_authority(config: &Config) -> anyhow::Result<AuthorityContext> {
    let authority = AuthorityContext::from_config(config)?;
    if !authority.can_issue() {
        anyhow::bail!("no signing key configured (set authority.secret_key or secret_key_path)");
    }
    Ok(authority)
}

/// Issue a token and print it on stdout.
pub(crate) fn issue(
    config: &Config,
    audience: &str,
    lifetime_secs: Option<u64>,
    mut capabilities: Vec<Capability>,
) -> anyhow::Result<()> {
    let authority = signing_authority(config)?;
    let lifetime = lifetime_secs.unwrap_or(config.session.token_lifetime_secs);

    if capabilities.is_empty() {
        eprintln!(
            "{}",
            Theme::warning("No --can given; issuing the root capability.")
        );
        capabilities.push(Capability::root());
    }
    for capability in &capabilities {
        eprintln!("{}", Theme::dimmed(&format!("  grant {capability}")));
    }

    let token = authority.issue(&Principal::new(audience), lifetime, capabilities)?;
    tracing::info!(audience, lifetime, "issued token");
    println!("{token}");
    Ok(())
}

/// Issue the email delegation token for `audience` and print it on stdout.
pub(crate) fn issue_email(config: &Config, audience: &str) -> anyhow::Result<()> {
    let authority = signing_authority(config)?;
    let token = authority.issue_email_delegation(&Principal::new(audience))?;
    println!("{token}");
    Ok(())
}

fn format_time(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| format!("{} ({secs})", t.to_rfc3339()))
}

fn print_token(token: &Token) {
    println!("{}", Theme::kv("ID", &token.id.to_hex()));
    println!("{}", Theme::kv("Issuer", token.issuer.as_str()));
    println!("{}", Theme::kv("Audience", token.audience.as_str()));
    println!("{}", Theme::kv("Issued", &format_time(token.issued_at)));
    if let Some(nbf) = token.not_before {
        println!("{}", Theme::kv("Not before", &format_time(nbf)));
    }
    println!("{}", Theme::kv("Expires", &format_time(token.expires_at)));
    if let Some(nonce) = &token.nonce {
        println!("{}", Theme::kv("Nonce", nonce));
    }
    if let Some(facts) = &token.facts {
        println!("{}", Theme::kv("Facts", &facts.to_string()));
    }

    println!("\n{}", Theme::header("Capabilities"));
    for capability in &token.capabilities {
        let label = if capability.is_root() {
            format!("{capability} {}", Theme::dimmed("(root)"))
        } else {
            capability.to_string()
        };
        println!("  {label}");
    }
}

/// Decode a token and print its claims without trusting it.
pub(crate) fn inspect(wire: &str) -> anyhow::Result<()> {
    let token = Token::decode(wire.trim())?;

    println!("\n{}", Theme::header("Token"));
    println!("{}", Theme::separator());
    print_token(&token);
    println!("{}", Theme::separator());

    match token.verify_signature() {
        Ok(()) => println!("{}", Theme::success("Signature matches the issuer key")),
        Err(_) => println!("{}", Theme::error("Signature does not match the issuer key")),
    }
    if token.is_expired_at(Utc::now().timestamp()) {
        println!("{}", Theme::warning("Token has expired"));
    }
    println!(
        "{}",
        Theme::dimmed("Not checked against the root issuer; use `clusterdir verify`.")
    );
    Ok(())
}

/// Verify a token against the configured root issuer, optionally for an
/// audience and a required capability.
pub(crate) async fn verify(
    config: &Config,
    wire: &str,
    audience: Option<&str>,
    required: Option<&Capability>,
) -> anyhow::Result<()> {
    let authority = AuthorityContext::from_config(config)?;
    let root = authority.root_issuer().clone();
    let verifier = authority.verifier().with_trusted_issuer(root.clone());
    let wire = wire.trim();

    let result = match (audience.map(Principal::new), required) {
        (Some(audience), Some(required)) => {
            verifier
                .check_capability(wire, &audience, &root, required)
                .await
        },
        (Some(audience), None) => verifier.verify(wire).and_then(|token| {
            if token.audience == audience {
                Ok(token)
            } else {
                Err(CapabilityError::AudienceMismatch {
                    expected: audience.to_string(),
                    actual: token.audience.to_string(),
                })
            }
        }),
        (None, _) => verifier.verify(wire),
    };

    match result {
        Ok(token) => {
            println!("{}", Theme::success("Token is valid"));
            print_token(&token);
            Ok(())
        },
        Err(e) => {
            let stage = VerificationStage::of(&e);
            println!("{}", Theme::error(&format!("Token rejected at {stage:?}")));
            Err(e.into())
        },
    }
}
