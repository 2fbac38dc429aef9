//! Environment variable parsing.
//!
//! All helpers treat an unset or empty variable as absent and fail with
//! [`ConfigError::InvalidValue`] when a set variable does not parse.

use std::num::{NonZeroU64, NonZeroUsize};
use std::str::FromStr;
use std::time::Duration;

use super::settings::ConfigError;

/// Source of configuration variables.
pub trait EnvLookup {
    /// Value of `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

impl<F> EnvLookup for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Trimmed, non-empty value of `key`.
pub fn lookup_str(lookup: &dyn EnvLookup, key: &str) -> Option<String> {
    lookup
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_with<T: FromStr>(
    lookup: &dyn EnvLookup,
    key: &str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    lookup_str(lookup, key)
        .map(|raw| {
            raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                expected,
            })
        })
        .transpose()
}

/// Parse a boolean: `true/false/1/0/yes/no`, case-insensitive.
pub fn parse_bool(lookup: &dyn EnvLookup, key: &str) -> Result<Option<bool>, ConfigError> {
    lookup_str(lookup, key)
        .map(|raw| match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                expected: "boolean",
            }),
        })
        .transpose()
}

/// Parse a finite float.
pub fn parse_f64(lookup: &dyn EnvLookup, key: &str) -> Result<Option<f64>, ConfigError> {
    match parse_with::<f64>(lookup, key, "float")? {
        Some(v) if !v.is_finite() => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: v.to_string(),
            expected: "finite float",
        }),
        other => Ok(other),
    }
}

/// Parse an unsigned 32-bit integer.
pub fn parse_u32(lookup: &dyn EnvLookup, key: &str) -> Result<Option<u32>, ConfigError> {
    parse_with(lookup, key, "unsigned integer")
}

/// Parse a port number.
pub fn parse_u16(lookup: &dyn EnvLookup, key: &str) -> Result<Option<u16>, ConfigError> {
    parse_with(lookup, key, "port number")
}

/// Parse a count that must be at least one.
pub fn parse_positive_usize(
    lookup: &dyn EnvLookup,
    key: &str,
) -> Result<Option<usize>, ConfigError> {
    Ok(parse_with::<NonZeroUsize>(lookup, key, "positive integer")?.map(NonZeroUsize::get))
}

/// Parse a duration given in milliseconds.
pub fn parse_duration_millis(
    lookup: &dyn EnvLookup,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_with::<u64>(lookup, key, "milliseconds")?.map(Duration::from_millis))
}

/// Parse a duration given in seconds.
pub fn parse_duration_secs(
    lookup: &dyn EnvLookup,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_with::<u64>(lookup, key, "seconds")?.map(Duration::from_secs))
}

/// Parse a non-zero duration given in seconds.
pub fn parse_positive_duration_secs(
    lookup: &dyn EnvLookup,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_with::<NonZeroU64>(lookup, key, "positive seconds")?
        .map(|secs| Duration::from_secs(secs.get())))
}

/// Parse a comma-separated list, dropping empty items.
pub fn parse_list(lookup: &dyn EnvLookup, key: &str) -> Option<Vec<String>> {
    lookup_str(lookup, key).map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    })
}
