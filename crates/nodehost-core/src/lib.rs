//! Nodehost Core - Foundation types for the nodehost plugin runtime.
//!
//! This crate provides:
//! - Validated identifiers for packages and process namespaces
//! - [`NodePath`], the address of a process in the process hierarchy
//! - The deterministic path layout every node is placed into
//! - Home directory scaffolding for persisted state
//!
//! # Path Layout
//!
//! ```text
//! /flows/{process_id}/{package_id}            node flow path (process tree)
//! /data/{process_id}/{package_id}             user-visible data
//! /system/runtime/{process_id}/{package_id}   system runtime data
//! /system/node-controller                     the controller itself
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod dirs;
pub mod error;
pub mod ids;
pub mod layout;
pub mod path;
pub mod types;

pub use dirs::NodeHostHome;
pub use error::{CoreError, CoreResult};
pub use ids::{PackageId, ProcessId};
pub use path::NodePath;
pub use types::Timestamp;
