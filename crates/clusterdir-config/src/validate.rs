//! Post-merge configuration validation.
//!
//! Checks that deserialized [`Config`](crate::Config) values are in range and
//! that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Largest accepted signed-request skew window (1 hour).
pub const MAX_CLOCK_SKEW_SECS: u64 = 3600;

/// Validate a fully merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_authority(config)?;
    validate_session(config)?;
    validate_signed_requests(config)?;
    validate_routes(config)?;
    validate_revocation(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_authority(config: &Config) -> ConfigResult<()> {
    let a = &config.authority;

    if a.secret_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
        return Err(invalid("authority.secret_key", "must not be empty when set"));
    }

    if let Some(issuer) = &a.root_issuer
        && !issuer.starts_with("did:key:z")
    {
        return Err(invalid(
            "authority.root_issuer",
            format!("'{issuer}' is not a did:key identifier"),
        ));
    }

    Ok(())
}

fn validate_session(config: &Config) -> ConfigResult<()> {
    let s = &config.session;

    let name_ok = !s.cookie_name.is_empty()
        && s.cookie_name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'));
    if !name_ok {
        return Err(invalid(
            "session.cookie_name",
            format!("'{}' is not a valid cookie name", s.cookie_name),
        ));
    }

    for (field, value) in [
        ("session.token_lifetime_secs", s.token_lifetime_secs),
        ("session.delegation_lifetime_secs", s.delegation_lifetime_secs),
        ("session.cookie_max_age_secs", s.cookie_max_age_secs),
    ] {
        if value == 0 {
            return Err(invalid(field, "must be greater than zero"));
        }
        if i64::try_from(value).is_err() {
            return Err(invalid(field, "is out of range"));
        }
    }

    if s.cookie_max_age_secs < s.token_lifetime_secs {
        return Err(invalid(
            "session.cookie_max_age_secs",
            format!(
                "cookie max-age {}s is shorter than the token lifetime {}s",
                s.cookie_max_age_secs, s.token_lifetime_secs
            ),
        ));
    }

    Ok(())
}

fn validate_signed_requests(config: &Config) -> ConfigResult<()> {
    let r = &config.signed_requests;

    if r.max_clock_skew_secs == 0 || r.max_clock_skew_secs > MAX_CLOCK_SKEW_SECS {
        return Err(invalid(
            "signed_requests.max_clock_skew_secs",
            format!("must be between 1 and {MAX_CLOCK_SKEW_SECS}"),
        ));
    }

    if r.max_body_bytes == 0 {
        return Err(invalid(
            "signed_requests.max_body_bytes",
            "must be greater than zero",
        ));
    }

    Ok(())
}

fn validate_routes(config: &Config) -> ConfigResult<()> {
    let prefix = &config.routes.api_prefix;

    if prefix.is_empty() {
        return Ok(());
    }
    let well_formed = prefix.starts_with('/')
        && !prefix.ends_with('/')
        && !prefix.contains("//")
        && !prefix.contains(['?', '#', ' ']);
    if !well_formed {
        return Err(invalid(
            "routes.api_prefix",
            format!("'{prefix}' must start with '/' and not end with one"),
        ));
    }

    Ok(())
}

fn validate_revocation(config: &Config) -> ConfigResult<()> {
    let r = &config.revocation;
    if r.cache_ttl_secs > 0 && r.cache_capacity == 0 {
        return Err(invalid(
            "revocation.cache_capacity",
            "must be greater than zero when caching is enabled",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}
