//! Config file discovery and layered loading.
//!
//! 1. Parse `defaults.toml` → base
//! 2. Merge `{home}/config.toml` (user)
//! 3. Apply environment overrides
//! 4. Deserialize merged tree → `Config`
//! 5. Validate

use std::collections::HashMap;
use std::path::Path;

use nodehost_core::NodeHostHome;
use tracing::{debug, info};

use crate::env::apply_env_overrides;
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load the configuration for `home` with the given environment snapshot.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the user config file is malformed, or if
/// the final merged configuration fails validation.
pub fn load(home: &NodeHostHome, env_vars: &HashMap<String, String>) -> ConfigResult<Config> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    let user_path = home.config_path();
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge(&mut merged, &overlay);
        info!(path = %user_path.display(), "loaded user config");
    }

    let env_count = apply_env_overrides(&mut merged, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable overrides");
    }

    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Load a config from a specific file path (no layering).
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let metadata = std::fs::metadata(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(oversized(path, metadata.len()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    validate::validate(&config)?;
    Ok(config)
}

fn oversized(path: &Path, len: u64) -> ConfigError {
    ConfigError::ValidationError {
        field: path.display().to_string(),
        message: format!(
            "config file is {len} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit"
        ),
    }
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    let len = u64::try_from(content.len()).unwrap_or(u64::MAX);
    if len > MAX_CONFIG_FILE_SIZE {
        return Err(oversized(path, len));
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_to_default_impl() {
        let config: Config = toml::from_str(DEFAULTS_TOML).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_without_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let home = NodeHostHome::from_path(dir.path());
        let config = load(&home, &HashMap::new()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn user_file_and_env_layering() {
        let dir = tempfile::tempdir().unwrap();
        let home = NodeHostHome::from_path(dir.path());
        std::fs::write(
            home.config_path(),
            r#"
            [controller]
            init_timeout_secs = 5

            [logging]
            level = "warn"
            format = "pretty"
            "#,
        )
        .unwrap();

        let env = HashMap::from([("NODEHOST_LOG".to_owned(), "trace".to_owned())]);
        let config = load(&home, &env).unwrap();
        assert_eq!(config.controller.init_timeout_secs, 5);
        assert_eq!(config.controller.shutdown_timeout_secs, 10);
        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn invalid_user_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let home = NodeHostHome::from_path(dir.path());
        std::fs::write(home.config_path(), "[installer]\ndownload_timeout_secs = 0\n").unwrap();
        assert!(matches!(
            load(&home, &HashMap::new()),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn malformed_user_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let home = NodeHostHome::from_path(dir.path());
        std::fs::write(home.config_path(), "[controller\n").unwrap();
        assert!(matches!(
            load(&home, &HashMap::new()),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn load_file_nonexistent() {
        let result = load_file(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn oversized_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("huge.toml");
        let data = "x = \"".to_owned() + &"a".repeat(1_100_000) + "\"";
        std::fs::write(&file_path, data).unwrap();

        let result = try_load_file(&file_path);
        assert!(
            matches!(result, Err(ConfigError::ValidationError { .. })),
            "Expected ValidationError for oversized config, got: {result:?}"
        );
    }
}
