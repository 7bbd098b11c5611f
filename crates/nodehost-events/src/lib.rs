//! Nodehost Events - Domain event bus.
//!
//! Registries, the repository manager, the controller and the process
//! sandbox publish [`NodeHostEvent`]s to a shared [`EventBus`]. Any number
//! of subscribers receive every event in publication order.
//!
//! ```rust
//! use nodehost_core::PackageId;
//! use nodehost_events::{EventBus, EventMetadata, NodeHostEvent};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(NodeHostEvent::PackageUninstalled {
//!     metadata: EventMetadata::new("registry"),
//!     package_id: PackageId::lookup("weather").unwrap(),
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "package_uninstalled");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod bus;
mod event;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{EventMetadata, NodeHostEvent};
