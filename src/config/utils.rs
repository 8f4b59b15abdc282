use std::env;
use std::str::FromStr;

/// Read a trimmed, non-empty environment variable.
pub(crate) fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a boolean flag value.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off`, case-insensitively.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean environment variable, falling back to `default` when unset.
pub(crate) fn env_bool(key: &str, default: bool) -> Result<bool, Box<dyn std::error::Error>> {
    match env_string(key) {
        Some(value) => parse_bool(&value)
            .ok_or_else(|| format!("Invalid boolean for {key}: {value}").into()),
        None => Ok(default),
    }
}

/// Read and parse an environment variable, falling back to `default` when unset.
pub(crate) fn env_parse<T>(key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| format!("Invalid value for {key}: {value} ({e})").into()),
        None => Ok(default),
    }
}
