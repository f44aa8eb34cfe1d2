//! Configuration types for the cluster directory authority.
//!
//! Nothing here depends on other internal crates. Conversion into domain
//! types happens at the boundary (`AuthorityContext::from_config`). Every
//! struct implements [`Default`], so a bare `[section]` header in TOML yields
//! a working section.

use std::path::PathBuf;

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server signing key and trusted root issuer.
    pub authority: AuthoritySection,
    /// Session token and cookie settings.
    pub session: SessionSection,
    /// Signed-request authentication limits.
    pub signed_requests: SignedRequestsSection,
    /// Route table settings.
    pub routes: RoutesSection,
    /// Revocation lookup caching.
    pub revocation: RevocationSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// AuthoritySection
// ---------------------------------------------------------------------------

/// Server key material.
///
/// `secret_key` wins over `secret_key_path` when both are set. Without
/// either, the process can verify tokens but not issue them.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthoritySection {
    /// 32-byte Ed25519 seed, hex or base64. Prefer the environment.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// File holding the raw 32-byte seed.
    pub secret_key_path: Option<PathBuf>,
    /// Trusted root issuer (`did:key:…`). Defaults to the signing key's DID.
    pub root_issuer: Option<String>,
}

impl std::fmt::Debug for AuthoritySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthoritySection")
            .field("has_secret_key", &self.secret_key.is_some())
            .field("secret_key_path", &self.secret_key_path)
            .field("root_issuer", &self.root_issuer)
            .finish()
    }
}

impl Serialize for AuthoritySection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("AuthoritySection", 2)?;
        // secret_key is never written out.
        state.serialize_field("secret_key_path", &self.secret_key_path)?;
        state.serialize_field("root_issuer", &self.root_issuer)?;
        state.end()
    }
}

// ---------------------------------------------------------------------------
// SessionSection
// ---------------------------------------------------------------------------

/// Session token lifetimes and cookie attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Cookie carrying the session token.
    pub cookie_name: String,
    /// Lifetime of login/registration/refresh tokens.
    pub token_lifetime_secs: u64,
    /// `Max-Age` of the session cookie. Must not be shorter than the token.
    pub cookie_max_age_secs: u64,
    /// Emit the `Secure` attribute. Turn off only for local HTTP development.
    pub secure_cookie: bool,
    /// Lifetime of narrow delegation tokens (email grants).
    pub delegation_lifetime_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            cookie_name: "ucan_token".to_owned(),
            token_lifetime_secs: 3600,
            cookie_max_age_secs: 86_400,
            secure_cookie: true,
            delegation_lifetime_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// SignedRequestsSection
// ---------------------------------------------------------------------------

/// Limits for header-signed requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignedRequestsSection {
    /// Accepted distance between `X-Timer` and the server clock.
    pub max_clock_skew_secs: u64,
    /// Largest body that will be signature-checked.
    pub max_body_bytes: usize,
}

impl Default for SignedRequestsSection {
    fn default() -> Self {
        Self {
            max_clock_skew_secs: 300,
            max_body_bytes: 1_048_576,
        }
    }
}

// ---------------------------------------------------------------------------
// RoutesSection
// ---------------------------------------------------------------------------

/// Route table settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesSection {
    /// Prefix stripped before route matching.
    pub api_prefix: String,
}

impl Default for RoutesSection {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// RevocationSection
// ---------------------------------------------------------------------------

/// Caching in front of the revocation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationSection {
    /// How long a lookup result is reused. `0` disables caching.
    pub cache_ttl_secs: u64,
    /// Maximum cached entries.
    pub cache_capacity: usize,
}

impl Default for RevocationSection {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 60,
            cache_capacity: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["clusterdir_capabilities=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_sections_get_defaults() {
        let config: Config = toml::from_str("[session]\n[routes]\n").unwrap();
        assert_eq!(config.session.cookie_name, "ucan_token");
        assert_eq!(config.session.token_lifetime_secs, 3600);
        assert_eq!(config.routes.api_prefix, "/api");
        assert!(config.authority.secret_key.is_none());
    }

    #[test]
    fn test_authority_debug_redacts_secret() {
        let section = AuthoritySection {
            secret_key: Some("00".repeat(32)),
            secret_key_path: None,
            root_issuer: None,
        };
        let debug_str = format!("{section:?}");
        assert!(!debug_str.contains(&"00".repeat(32)));
        assert!(debug_str.contains("has_secret_key: true"));
    }

    #[test]
    fn test_authority_serialize_omits_secret() {
        let section = AuthoritySection {
            secret_key: Some("super-secret".to_owned()),
            secret_key_path: Some(PathBuf::from("/etc/clusterdir/server.key")),
            root_issuer: None,
        };
        let json = serde_json::to_string(&section).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!json.contains("secret_key\""));
        assert!(json.contains("server.key"));
    }
}
