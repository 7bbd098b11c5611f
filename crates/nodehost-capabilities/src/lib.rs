//! Nodehost Capabilities - Path-scoped permission grants for sandboxed nodes.
//!
//! A node may only reach another process if its [`NodeSecurityPolicy`]
//! holds a [`PathCapability`] whose [`PathPattern`] matches the target path
//! for the requested [`Operation`], and the policy has been approved.
//!
//! ```text
//! PathCapability { pattern: "/flows/shared/**", operation: message, justification }
//!        │
//!        ▼
//! NodeSecurityPolicy ── approve() ──► can_access(path, op)
//!        │                                   │
//!        └──── AccessPolicy ◄── ComposedPolicy (intersection)
//! ```
//!
//! Grants are frozen once a policy is approved. Runtime checks only
//! append to the bounded audit log.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod capability;
mod error;
mod operation;
mod pattern;
mod policy;

pub use capability::{CapabilityManifest, PathCapability};
pub use error::{CapabilityError, CapabilityResult};
pub use operation::Operation;
pub use pattern::PathPattern;
pub use policy::{
    AccessPolicy, AuditEntry, ComposedPolicy, MAX_AUDIT_ENTRIES, NodeSecurityPolicy,
};
