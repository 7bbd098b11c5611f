//! Process topology and the node sandbox.
//!
//! - [`ProcessRegistry`]: the process-registry contract every caller uses.
//!   Each call names the calling path.
//! - [`InMemoryProcessRegistry`]: the host's real topology (process tree plus
//!   directed connections).
//! - [`NodeProcessInterface`]: a decorator implementing [`ProcessRegistry`]
//!   that confines a node to its subtree and checks every boundary-crossing
//!   call against the node's [`AccessPolicy`](nodehost_capabilities::AccessPolicy).
//! - [`DataInterface`] / [`FsDataInterface`]: storage scoped to a node's
//!   runtime and user data paths.
//!
//! ```text
//!   node ──► NodeProcessInterface ──► (parent NodeProcessInterface …) ──► InMemoryProcessRegistry
//!              │ caller within subtree?
//!              │ target reachable and granted?
//!              └ topology results filtered to subtree
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod data;
pub mod error;
pub mod interface;
pub mod memory;
pub mod registry;

pub use data::{DataInterface, DataScope, FsDataInterface};
pub use error::{ProcessError, ProcessResult};
pub use interface::NodeProcessInterface;
pub use memory::InMemoryProcessRegistry;
pub use registry::{Message, ProcessHandler, ProcessInfo, ProcessRegistry, StreamSender};
