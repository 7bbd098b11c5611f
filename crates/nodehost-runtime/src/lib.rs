//! Node loading and lifecycle for the nodehost plugin runtime.
//!
//! - [`NodeHandle`]: what every loaded node implements
//! - [`CodeLoader`] / [`LoaderRegistry`] / [`FactoryLoader`]: loading
//!   strategies keyed by manifest type
//! - [`NodeInstance`] / [`NodeInstanceRegistry`]: running instances and
//!   their indices
//! - [`NodeController`]: load, unload, command dispatch, and shutdown
//!
//! # Example
//!
//! ```rust,ignore
//! let controller = NodeController::new(settings, packages, loaders, processes, Some(bus));
//! controller.start().await?;
//! let instance = controller.load_node(&PackageId::lookup("weather")?).await?;
//! controller.shutdown().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod controller;
pub mod error;
pub mod flags;
pub mod instance;
pub mod loader;
pub mod node;
mod router;

pub use controller::{ControllerSettings, NodeController, NodeStatus, UnloadOutcome};
pub use error::{ControllerError, ControllerResult, NodeError, NodeResult};
pub use flags::ControllerFlags;
pub use instance::{InstanceId, InstanceState, NodeInstance, NodeInstanceRegistry};
pub use loader::{CodeLoader, FactoryLoader, LoaderRegistry, NodeFactory};
pub use node::NodeHandle;
