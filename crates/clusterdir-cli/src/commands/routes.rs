//! Routes command: list the route table.

use clusterdir_capabilities::{Access, RouteRule, RouteTable};
use clusterdir_config::Config;

use crate::theme::Theme;

/// One-line description of how a rule is protected.
pub(crate) fn describe_access(rule: &RouteRule) -> String {
    match (&rule.access, rule.required_capability()) {
        (Access::Public, _) => "public".to_string(),
        (Access::SignedRequest, _) => "signed request".to_string(),
        (Access::Capability { .. }, Some(capability)) => capability.to_string(),
        (Access::Capability { resource, namespace }, None) => format!("{resource} {namespace}"),
    }
}

/// Print every rule of the configured table.
pub(crate) fn list_routes(config: &Config) -> anyhow::Result<()> {
    let table = RouteTable::builtin(&config.routes.api_prefix)?;

    println!("\n{}", Theme::header("Routes"));
    println!("{}", Theme::separator());
    for rule in table.rules() {
        println!(
            "  {:<7} {:<40} {}",
            rule.method.as_str(),
            format!("{}{}", table.prefix(), rule.pattern),
            describe_access(rule)
        );
    }
    println!("{}", Theme::separator());
    println!(
        "{}",
        Theme::dimmed(&format!("{} rules; unlisted routes are refused", table.rules().len()))
    );
    Ok(())
}
