//! Nodehost Telemetry - Logging setup for the nodehost runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use nodehost_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), nodehost_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("nodehost_process=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("Logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
#[cfg(feature = "config")]
pub use logging::log_config_from;
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
