//! Environment variable parsing shared by every `from_env` constructor.
//!
//! Constructors take a lookup function rather than reading the process
//! environment directly, so tests can feed a map instead of mutating
//! global state. `from_env()` wrappers pass [`process_env`].

use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required but not set")]
    Missing { name: &'static str },

    #[error("{name}='{value}' is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Look up a variable in the process environment. Empty values count as
/// unset.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `name`, falling back to `default` when unset.
pub fn parse_or<T, L>(lookup: &L, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    L: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Read `name` or fail with [`ConfigError::Missing`].
pub fn require<L>(lookup: &L, name: &'static str) -> Result<String, ConfigError>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(name).ok_or(ConfigError::Missing { name })
}

/// Read `name`, falling back to `default`.
pub fn string_or<L>(lookup: &L, name: &'static str, default: &str) -> String
where
    L: Fn(&str) -> Option<String>,
{
    lookup(name).unwrap_or_else(|| default.to_string())
}

/// Reject zero for counts and timeouts that must be positive.
pub fn require_positive<T>(name: &'static str, value: T) -> Result<T, ConfigError>
where
    T: PartialOrd + Default + std::fmt::Display + Copy,
{
    if value > T::default() {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn parse_or_uses_default_when_unset() {
        let lookup = env(&[]);
        assert_eq!(parse_or(&lookup, "X", 4usize).unwrap(), 4);
    }

    #[test]
    fn parse_or_reports_invalid_values() {
        let lookup = env(&[("X", "four")]);
        assert_matches!(
            parse_or(&lookup, "X", 4usize),
            Err(ConfigError::Invalid { name: "X", .. })
        );
    }

    #[test]
    fn require_reports_missing() {
        let lookup = env(&[]);
        assert_matches!(require(&lookup, "DATABASE_URL"), Err(ConfigError::Missing { .. }));
    }

    #[test]
    fn require_positive_rejects_zero() {
        assert!(require_positive("N", 0u64).is_err());
        assert_eq!(require_positive("N", 3u64).unwrap(), 3);
    }
}
