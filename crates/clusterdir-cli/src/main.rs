//! Clusterdir CLI - operator tools for the directory's capability authority.
//!
//! Generates and inspects key material, mints and checks capability tokens,
//! and answers "would this request be allowed" against the configured
//! route table.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clusterdir_capabilities::{Capability, Method};
use clusterdir_config::{Config, ConfigResult, ResolvedConfig};
use clusterdir_telemetry::{LogConfig, LogFormat, LogTarget};

mod commands;
mod theme;

use commands::{authorize, keys, routes, tokens};

/// Clusterdir - cluster directory capability authority
#[derive(Parser)]
#[command(name = "clusterdir")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an Ed25519 key file
    Keygen {
        /// Where to write the raw 32-byte secret
        path: PathBuf,

        /// Replace an existing key file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the did:key of a key
    Did {
        #[command(flatten)]
        source: keys::KeySource,
    },

    /// Issue a capability token signed by the configured authority key
    Issue {
        /// Audience principal
        audience: String,

        /// Token lifetime in seconds (defaults to the session lifetime)
        #[arg(short, long)]
        lifetime: Option<u64>,

        /// Capability to grant, as `with#can` (repeatable; root if omitted)
        #[arg(long = "can", value_parser = tokens::parse_capability)]
        capabilities: Vec<Capability>,

        /// Issue the narrow email delegation for the audience instead
        #[arg(long, conflicts_with_all = ["capabilities", "lifetime"])]
        email: bool,
    },

    /// Decode a token without checking it
    Inspect {
        /// Wire token
        token: String,
    },

    /// Verify a token against the configured root issuer
    Verify {
        /// Wire token
        token: String,

        /// Expected audience
        #[arg(short, long)]
        audience: Option<String>,

        /// Capability the token must grant, as `with#can`
        #[arg(short, long, requires = "audience", value_parser = tokens::parse_capability)]
        require: Option<Capability>,
    },

    /// Show how a request would be authorized
    Authorize {
        /// HTTP method
        method: Method,

        /// Request path, including the API prefix
        path: String,

        /// Session token presented with the request
        #[arg(short, long)]
        token: Option<String>,
    },

    /// List the route table
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolved = Config::load(cli.config.as_deref());

    // Set up logging from config, with --verbose override.
    // Tokens are printed on stdout, so logs stay on stderr.
    let mut log_config = resolved
        .as_ref()
        .ok()
        .and_then(|r| LogConfig::from_section(&r.config.logging).ok())
        .unwrap_or_else(|| LogConfig::new("warn").with_format(LogFormat::Compact))
        .with_target(LogTarget::Stderr);
    if !std::io::stderr().is_terminal() {
        log_config = log_config.without_ansi();
    }
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = clusterdir_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Keygen { path, force } => keys::generate_key(&path, force),
        Commands::Did { source } => keys::show_did(&source),
        Commands::Issue {
            audience,
            lifetime,
            capabilities,
            email,
        } => {
            let config = require_config(resolved)?;
            if email {
                tokens::issue_email(&config, &audience)
            } else {
                tokens::issue(&config, &audience, lifetime, capabilities)
            }
        },
        Commands::Inspect { token } => tokens::inspect(&token),
        Commands::Verify {
            token,
            audience,
            require,
        } => {
            let config = require_config(resolved)?;
            tokens::verify(&config, &token, audience.as_deref(), require.as_ref()).await
        },
        Commands::Authorize {
            method,
            path,
            token,
        } => {
            let config = require_config(resolved)?;
            authorize::show_decision(&config, method, &path, token.as_deref()).await
        },
        Commands::Routes => {
            let config = require_config(resolved)?;
            routes::list_routes(&config)
        },
    }
}

fn require_config(resolved: ConfigResult<ResolvedConfig>) -> Result<Config> {
    let resolved = resolved.context("failed to load configuration")?;
    for file in &resolved.loaded_files {
        tracing::debug!(path = %file, "loaded config file");
    }
    Ok(resolved.config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_issue() {
        let cli = Cli::try_parse_from([
            "clusterdir",
            "issue",
            "did:key:zAlice",
            "--lifetime",
            "60",
            "--can",
            "api:/clusters#clusters/POST",
            "--can",
            "api:/clusters/*#clusters/PUT",
        ])
        .unwrap();

        let Commands::Issue {
            audience,
            lifetime,
            capabilities,
            email,
        } = cli.command
        else {
            panic!("expected issue");
        };
        assert_eq!(audience, "did:key:zAlice");
        assert_eq!(lifetime, Some(60));
        assert_eq!(capabilities.len(), 2);
        assert_eq!(capabilities[1].path, "/clusters/*");
        assert!(!email);
    }

    #[test]
    fn test_email_conflicts_with_capabilities() {
        let result = Cli::try_parse_from([
            "clusterdir",
            "issue",
            "did:key:zAlice",
            "--email",
            "--can",
            "api:/clusters#clusters/POST",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_authorize_method() {
        let cli =
            Cli::try_parse_from(["clusterdir", "authorize", "delete", "/api/clusters/c1"]).unwrap();
        let Commands::Authorize { method, path, token } = cli.command else {
            panic!("expected authorize");
        };
        assert_eq!(method, Method::Delete);
        assert_eq!(path, "/api/clusters/c1");
        assert!(token.is_none());

        assert!(Cli::try_parse_from(["clusterdir", "authorize", "TRACE", "/api"]).is_err());
    }

    #[test]
    fn test_require_needs_audience() {
        let result = Cli::try_parse_from([
            "clusterdir",
            "verify",
            "a.b.c",
            "--require",
            "api:/clusters#clusters/POST",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["clusterdir", "routes", "--config", "/tmp/c.toml", "-v"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(cli.verbose);
    }
}
