//! Environment variable overrides.
//!
//! Environment variables sit above every file layer: when set, they
//! replace whatever the files configured.

use std::collections::HashMap;

use tracing::debug;

use crate::merge::set_path;

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "NODEHOST_LOG",
        field_path: "logging.level",
    },
    EnvMapping {
        var_name: "NODEHOST_LOG_FORMAT",
        field_path: "logging.format",
    },
];

/// Snapshot the `NODEHOST_*` environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("NODEHOST_"))
        .collect()
}

/// Apply every mapped variable present in `env_vars` to `merged`.
///
/// Returns how many overrides were applied. Empty values are ignored.
pub fn apply_env_overrides(merged: &mut toml::Value, env_vars: &HashMap<String, String>) -> usize {
    let mut applied: usize = 0;
    for mapping in ENV_MAPPINGS {
        let Some(value) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying environment override"
        );
        set_path(merged, mapping.field_path, toml::Value::String(value.to_owned()));
        applied = applied.saturating_add(1);
    }
    applied
}
