//! Helpers for reading typed settings from environment variables.
//!
//! Each crate's config struct has a `from_env()` built from these; a value
//! that is set but does not parse is an error, an unset value takes the
//! default.

use std::str::FromStr;

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a valid {expected}, got '{value}'")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Read `name`, treating an empty value as unset.
pub fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read `name` or fall back to `default`.
pub fn env_string(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

/// Read and parse `name`, or fall back to `default` when unset.
pub fn env_parse<T: FromStr>(
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env_opt(name) {
        Some(raw) => parse_value(name, expected, &raw),
        None => Ok(default),
    }
}

/// Read `name`, failing when it is unset.
pub fn env_required(name: &'static str) -> Result<String, ConfigError> {
    env_opt(name).ok_or(ConfigError::Missing(name))
}

/// Parse booleans the way shells tend to write them.
pub fn env_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env_opt(name) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                expected: "boolean",
                value: raw,
            }),
        },
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(
    name: &'static str,
    expected: &'static str,
    raw: &str,
) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        expected,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_value_reports_name() {
        let err = parse_value::<u16>("PORT", "u16", "eighty").unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "PORT", .. });
        assert_eq!(err.to_string(), "PORT must be a valid u16, got 'eighty'");
    }

    #[test]
    fn parse_value_accepts_numbers() {
        assert_eq!(parse_value::<u64>("X", "u64", "30").unwrap(), 30);
    }

    #[test]
    fn unset_variable_takes_default() {
        assert_eq!(
            env_parse("STORYREEL_TEST_SURELY_UNSET", "u32", 7u32).unwrap(),
            7
        );
        assert!(env_bool("STORYREEL_TEST_SURELY_UNSET", true).unwrap());
        assert_matches!(
            env_required("STORYREEL_TEST_SURELY_UNSET"),
            Err(ConfigError::Missing(_))
        );
    }
}
