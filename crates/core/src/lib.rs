//! Capability handlers of the portal broker.
//!
//! Each module wires one family of broker methods onto the request engine
//! and session registry from `portal_runtime`. [`Broker`] bundles them
//! behind a single engine.
//!
//! # Main Types
//!
//! - [`FileTransfer`] - session-based file sharing between sandboxes
//! - [`Actions`] - permission-gated action activation
//! - [`Geolocation`] - location tracking requests with interim updates
//! - [`Notifications`] - validated notifications and action routing
//! - [`ProxyResolver`] - proxy lookup for networked sandboxes

pub mod actions;
pub mod app_id;
pub mod broker;
pub mod file_transfer;
pub mod geolocation;
pub mod notification;
pub mod proxy_resolver;

#[cfg(test)]
mod test_support;

pub use actions::{ActivateAction, Actions, Launcher};
pub use broker::{Backends, Broker};
pub use file_transfer::{
	AddFlags, DescriptorResolver, DocumentPermissions, DocumentStore, FileTransfer, ResolvedPath, Transfer,
	select_descriptors,
};
pub use geolocation::{Geolocation, LocationSource, LocationTracker, TrackLocation};
pub use notification::{Delivery, NotificationBackend, Notifications};
pub use proxy_resolver::{ProxyLookup, ProxyResolver};
