//! Environment variable fallbacks.
//!
//! Env vars are fallback, not override: they only fill fields that no config
//! file set.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources};

/// Names the config file to load on top of defaults.
pub const CONFIG_PATH_VAR: &str = "CLUSTERDIR_CONFIG";

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: ValueKind,
}

#[derive(Clone, Copy)]
enum ValueKind {
    Str,
    Int,
    Bool,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "CLUSTERDIR_SERVER_KEY",
        field_path: "authority.secret_key",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CLUSTERDIR_SERVER_KEY_PATH",
        field_path: "authority.secret_key_path",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CLUSTERDIR_ROOT_ISSUER",
        field_path: "authority.root_issuer",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CLUSTERDIR_SECURE_COOKIE",
        field_path: "session.secure_cookie",
        kind: ValueKind::Bool,
    },
    EnvMapping {
        var_name: "CLUSTERDIR_MAX_CLOCK_SKEW_SECS",
        field_path: "signed_requests.max_clock_skew_secs",
        kind: ValueKind::Int,
    },
    EnvMapping {
        var_name: "CLUSTERDIR_LOG_LEVEL",
        field_path: "logging.level",
        kind: ValueKind::Str,
    },
    EnvMapping {
        var_name: "CLUSTERDIR_LOG_FORMAT",
        field_path: "logging.format",
        kind: ValueKind::Str,
    },
];

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file layer. Defaults do not count as set.
///
/// Returns the number of env vars applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a numeric or boolean variable does
/// not parse.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let set_by_file = sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults);
        if set_by_file {
            continue;
        }

        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        let value = coerce(mapping, raw)?;
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    Ok(count)
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    let invalid = |expected: &str| ConfigError::EnvError {
        var_name: mapping.var_name.to_owned(),
        message: format!("expected {expected}, got '{raw}'"),
    };
    match mapping.kind {
        ValueKind::Str => Ok(toml::Value::String(raw.to_owned())),
        ValueKind::Int => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|_| invalid("an integer")),
        ValueKind::Bool => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(invalid("a boolean")),
        },
    }
}

/// Set a dotted `section.field` path, creating the section if needed.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let Some((section, field)) = path.split_once('.') else {
        return;
    };
    let Some(table) = root.as_table_mut() else {
        return;
    };
    let section = table
        .entry(section.to_owned())
        .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    if let Some(section) = section.as_table_mut() {
        section.insert(field.to_owned(), value);
    }
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_apply_env_fallbacks() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"info\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::Defaults);
        let env = make_env(&[
            ("CLUSTERDIR_LOG_LEVEL", "debug"),
            ("CLUSTERDIR_SERVER_KEY", "abcd"),
        ]);

        let count = apply_env_fallbacks(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(count, 2);
        assert_eq!(merged["logging"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["authority"]["secret_key"].as_str(), Some("abcd"));
        assert_eq!(
            sources.get("logging.level"),
            Some(&ConfigLayer::Environment)
        );
    }

    #[test]
    fn test_env_fallback_skips_file_values() {
        let mut merged: toml::Value = toml::from_str("[logging]\nlevel = \"warn\"").unwrap();
        let mut sources = FieldSources::new();
        sources.insert("logging.level".to_owned(), ConfigLayer::Explicit);

        let env = make_env(&[("CLUSTERDIR_LOG_LEVEL", "debug")]);
        let count = apply_env_fallbacks(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(count, 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("warn"));
    }

    #[test]
    fn test_typed_values() {
        let mut merged: toml::Value = toml::from_str("").unwrap();
        let mut sources = FieldSources::new();
        let env = make_env(&[
            ("CLUSTERDIR_SECURE_COOKIE", "false"),
            ("CLUSTERDIR_MAX_CLOCK_SKEW_SECS", "120"),
        ]);

        apply_env_fallbacks(&mut merged, &mut sources, &env).unwrap();

        assert_eq!(merged["session"]["secure_cookie"].as_bool(), Some(false));
        assert_eq!(
            merged["signed_requests"]["max_clock_skew_secs"].as_integer(),
            Some(120)
        );
    }

    #[test]
    fn test_bad_typed_value() {
        let mut merged: toml::Value = toml::from_str("").unwrap();
        let mut sources = FieldSources::new();
        let env = make_env(&[("CLUSTERDIR_MAX_CLOCK_SKEW_SECS", "five")]);

        let result = apply_env_fallbacks(&mut merged, &mut sources, &env);
        assert!(matches!(result, Err(ConfigError::EnvError { .. })));
    }
}
