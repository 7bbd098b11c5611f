//! Layered configuration for the nodehost runtime.
//!
//! # Usage
//!
//! ```rust,no_run
//! use nodehost_config::Config;
//! use nodehost_core::NodeHostHome;
//!
//! let home = NodeHostHome::resolve().unwrap();
//! let config = Config::load(&home).unwrap();
//! println!("init timeout: {:?}", config.controller.init_timeout());
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`NODEHOST_LOG`, `NODEHOST_LOG_FORMAT`)
//! 2. **User** (`{home}/config.toml`, where home honours `NODEHOST_HOME`)
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Recursive TOML merging.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the user config file is malformed or the
    /// final configuration fails validation.
    pub fn load(home: &nodehost_core::NodeHostHome) -> ConfigResult<Self> {
        loader::load(home, &env::collect_env_vars())
    }

    /// Load configuration from a single file (no layering).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }
}
