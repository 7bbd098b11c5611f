//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Accepted log levels.
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
/// Accepted log formats.
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_timeouts(config)?;
    validate_repositories(config)?;
    validate_installer(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_timeouts(config: &Config) -> ConfigResult<()> {
    let checks = [
        ("controller.init_timeout_secs", config.controller.init_timeout_secs),
        (
            "controller.shutdown_timeout_secs",
            config.controller.shutdown_timeout_secs,
        ),
        (
            "repositories.fetch_timeout_secs",
            config.repositories.fetch_timeout_secs,
        ),
        (
            "installer.download_timeout_secs",
            config.installer.download_timeout_secs,
        ),
    ];
    for (field, secs) in checks {
        if secs == 0 {
            return Err(invalid(field, "timeout must be at least 1 second"));
        }
    }
    Ok(())
}

fn validate_repositories(config: &Config) -> ConfigResult<()> {
    let default = &config.repositories.default;
    if default.id.trim().is_empty() {
        return Err(invalid("repositories.default.id", "must not be empty"));
    }
    check_http_url("repositories.default.url", &default.url)?;
    if let Some(key_url) = &default.key_url {
        check_http_url("repositories.default.key_url", key_url)?;
    }
    Ok(())
}

fn check_http_url(field: &str, raw: &str) -> ConfigResult<()> {
    if raw.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    let parsed = url::Url::parse(raw).map_err(|e| invalid(field, format!("invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(
            field,
            format!("unsupported scheme '{}'; expected http or https", parsed.scheme()),
        ));
    }
    Ok(())
}

fn validate_installer(config: &Config) -> ConfigResult<()> {
    if config.installer.max_artifact_bytes == 0 {
        return Err(invalid(
            "installer.max_artifact_bytes",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !LOG_LEVELS.contains(&l.level.to_lowercase().as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: {}",
                l.level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }
    if !LOG_FORMATS.contains(&l.format.to_lowercase().as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: {}",
                l.format,
                LOG_FORMATS.join(", ")
            ),
        ));
    }
    Ok(())
}
