//! Deterministic placement of nodes in the process hierarchy.
//!
//! Every path here is derived from a [`ProcessId`] and [`PackageId`],
//! both of which are validated as single path segments, so construction
//! cannot fail.

use crate::ids::{PackageId, ProcessId};
use crate::path::NodePath;

/// Root of all flow (message routing) paths.
pub const FLOWS_ROOT: &str = "/flows";
/// Root of user-visible node data.
pub const DATA_ROOT: &str = "/data";
/// Root of system runtime data.
pub const RUNTIME_ROOT: &str = "/system/runtime";
/// Path the node controller registers itself at.
pub const CONTROLLER_PATH: &str = "/system/node-controller";
/// Glob matching every node flow path (`/flows/{process}/{package}`).
pub const SIBLING_NODE_PATTERN: &str = "/flows/*/*";

/// `/flows`
#[must_use]
pub fn flows_root() -> NodePath {
    NodePath::from_segments(["flows"])
}

/// `/system/node-controller`
#[must_use]
pub fn controller_path() -> NodePath {
    NodePath::from_segments(["system", "node-controller"])
}

/// `/flows/{process_id}`
#[must_use]
pub fn flow_base(process_id: &ProcessId) -> NodePath {
    NodePath::from_segments(["flows", process_id.as_str()])
}

/// `/data/{process_id}`
#[must_use]
pub fn data_root(process_id: &ProcessId) -> NodePath {
    NodePath::from_segments(["data", process_id.as_str()])
}

/// `/system/runtime/{process_id}`
#[must_use]
pub fn runtime_root(process_id: &ProcessId) -> NodePath {
    NodePath::from_segments(["system", "runtime", process_id.as_str()])
}

/// Flow path of a node: `/flows/{process_id}/{package_id}`.
#[must_use]
pub fn node_flow_path(process_id: &ProcessId, package: &PackageId) -> NodePath {
    NodePath::from_segments(["flows", process_id.as_str(), package.id()])
}

/// Runtime data path of a node: `/system/runtime/{process_id}/{package_id}`.
#[must_use]
pub fn node_runtime_path(process_id: &ProcessId, package: &PackageId) -> NodePath {
    NodePath::from_segments(["system", "runtime", process_id.as_str(), package.id()])
}

/// User data path of a node: `/data/{process_id}/{package_id}`.
#[must_use]
pub fn node_data_path(process_id: &ProcessId, package: &PackageId) -> NodePath {
    NodePath::from_segments(["data", process_id.as_str(), package.id()])
}

/// Whether `path` is exactly a node flow path (`/flows/*/*`).
#[must_use]
pub fn is_node_flow_path(path: &NodePath) -> bool {
    path.depth() == 3 && path.segments().next() == Some("flows")
}
