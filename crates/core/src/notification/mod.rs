//! Desktop notifications.
//!
//! Records are validated against the closed schema before the call returns.
//! Showing them happens afterwards on a worker: apps the user silenced are
//! dropped without an error, and every notification the backend accepted
//! is remembered so that its actions can be routed back to the connection
//! that added it.

use std::sync::Arc;

use dashmap::DashMap;
use portal_protocol::{NotificationRecord, Signal};
use portal_runtime::{AppIdentity, Bus, Caller, ConnectionId, Error, PermissionStore, Result};
use serde_json::Value;
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Permission table and id consulted before showing a notification.
pub const TABLE: &str = "notifications";
pub const PERMISSION_ID: &str = "notification";

/// Backend that displays notifications.
pub trait NotificationBackend: Send + Sync {
	fn add_notification(&self, app_id: &str, id: &str, record: &NotificationRecord) -> Result<()>;
	fn remove_notification(&self, app_id: &str, id: &str) -> Result<()>;
}

/// Outcome of [`Notifications::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	Shown,
	/// The app is not allowed to notify.
	Suppressed,
	/// The backend refused the notification.
	Failed,
}

pub struct Notifications {
	store: Arc<dyn PermissionStore>,
	backend: Arc<dyn NotificationBackend>,
	bus: Arc<dyn Bus>,
	/// `(app id, notification id)` to the connection that added it.
	active: DashMap<(String, String), ConnectionId>,
}

impl Notifications {
	pub fn new(store: Arc<dyn PermissionStore>, backend: Arc<dyn NotificationBackend>, bus: Arc<dyn Bus>) -> Self {
		Self {
			store,
			backend,
			bus,
			active: DashMap::new(),
		}
	}

	/// Parses a raw record.
	///
	/// # Errors
	///
	/// [`Error::InvalidArgument`] naming the first problem found.
	pub fn validate(raw: Value) -> Result<NotificationRecord> {
		NotificationRecord::parse(raw).map_err(|e| Error::InvalidArgument(format!("invalid notification: {e}")))
	}

	/// Returns false if the user silenced `app`. The host is never silenced.
	pub fn is_allowed(&self, app: &AppIdentity) -> bool {
		if app.is_host() {
			return true;
		}
		match self.store.lookup(TABLE, PERMISSION_ID) {
			Ok(entry) => !entry
				.get(app.id())
				.is_some_and(|tokens| tokens.iter().any(|t| t == "no")),
			Err(err) => {
				warn!(target = "portal.notification", error = %err, "error getting notification permissions");
				true
			}
		}
	}

	/// Shows a validated notification. Blocks on the backend.
	pub fn add(&self, caller: &Caller, id: &str, record: &NotificationRecord) -> Delivery {
		if !self.is_allowed(&caller.app) {
			debug!(target = "portal.notification", app = %caller.app, id, "notifications disabled for app");
			return Delivery::Suppressed;
		}
		if let Err(err) = self.backend.add_notification(caller.app.id(), id, record) {
			warn!(target = "portal.notification", app = %caller.app, id, error = %err, "backend call failed");
			return Delivery::Failed;
		}
		self.active
			.insert((caller.app.id().to_string(), id.to_string()), caller.connection.clone());
		Delivery::Shown
	}

	/// Withdraws a notification. Blocks on the backend.
	pub fn remove(&self, caller: &Caller, id: &str) -> bool {
		if let Err(err) = self.backend.remove_notification(caller.app.id(), id) {
			warn!(target = "portal.notification", app = %caller.app, id, error = %err, "backend call failed");
			return false;
		}
		self.active.remove(&(caller.app.id().to_string(), id.to_string()));
		true
	}

	/// Routes an action invoked on a shown notification to the connection
	/// that added it. Unknown notifications are dropped.
	pub fn action_invoked(&self, app_id: &str, id: &str, action: &str, parameter: &[Value]) -> bool {
		let sender = self
			.active
			.get(&(app_id.to_string(), id.to_string()))
			.map(|entry| entry.value().clone());
		match sender {
			Some(sender) => self.bus.emit(&sender, Signal::action_invoked(id, action, parameter)),
			None => {
				debug!(target = "portal.notification", app = app_id, id, "action for unknown notification");
				false
			}
		}
	}

	/// Forgets notifications added by a connection that went away.
	pub fn on_connection_lost(&self, connection: &ConnectionId) -> usize {
		let before = self.active.len();
		self.active.retain(|_, sender| sender != connection);
		before.saturating_sub(self.active.len())
	}

	pub fn active_len(&self) -> usize {
		self.active.len()
	}
}
