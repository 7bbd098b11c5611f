//! Shared test utilities for the nodehost runtime.
//!
//! Mock collaborators ([`MockNode`], [`MockFetcher`], [`MockDownloader`]),
//! fixtures for packages and installation requests, and [`TestHost`], a
//! package manager and node controller wired together over temp storage.
//!
//! # Usage
//!
//! ```rust,ignore
//! let host = TestHost::new(
//!     MockFetcher::new().with_document("main", package_list("Main", vec![package_entry("weather", "1.0.0")])),
//! )
//! .await;
//! let node = MockNode::new();
//! host.loaders.register(Arc::new(mock_loader([("weather", node.clone())])))?;
//! host.controller.start().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
