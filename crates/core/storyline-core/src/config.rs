//! Environment loading and typed lookups

use crate::{Result, StorylineError};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Load environment variables from a `.env` file in the current or a parent directory.
///
/// A missing file is not an error; the process environment is used as-is.
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(StorylineError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!("No .env file found, using process environment only");
            Ok(())
        }
        Err(e) => Err(StorylineError::config(format!(
            "Failed to load .env file: {}",
            e
        ))),
    }
}

/// Load environment variables from a specific file
pub fn load_env_from_path<P: AsRef<Path>>(path: P) -> Result<()> {
    dotenvy::from_path(path.as_ref()).map_err(|e| {
        StorylineError::config(format!(
            "Failed to load environment file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    tracing::info!("Loaded environment from: {}", path.as_ref().display());
    Ok(())
}

/// Get a required environment variable
pub fn get_required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| {
        StorylineError::config(format!(
            "Required environment variable '{}' is not set",
            key
        ))
    })
}

/// Get an environment variable or a default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an optional environment variable.
///
/// Unset or blank values yield `Ok(None)`. A value that is present but does not
/// parse is a configuration error rather than a silent fallback, so a typo in a
/// threshold cannot quietly disable a safety check.
pub fn get_env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StorylineError::config(format!("{}='{}': {}", key, raw, e))),
        _ => Ok(None),
    }
}

/// Parse an environment variable, falling back to `default` when unset
pub fn get_env_parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_env_parsed(key)?.unwrap_or(default))
}

/// Get an environment variable as boolean
pub fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| match v.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}
