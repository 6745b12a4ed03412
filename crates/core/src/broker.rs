//! All handlers wired to one engine.

use std::sync::Arc;

use portal_runtime::{
	AccessBackend, Bus, Caller, ConnectionId, Engine, PermissionStore, Permissions, RequestRegistry, Result, WorkerPool,
};
use tracing::debug;

use crate::actions::{Actions, Launcher};
use crate::file_transfer::{DescriptorResolver, DocumentStore, FileTransfer};
use crate::geolocation::{Geolocation, LocationSource};
use crate::notification::{NotificationBackend, Notifications};
use crate::proxy_resolver::{ProxyLookup, ProxyResolver};

/// External collaborators the handlers call into.
#[derive(Clone)]
pub struct Backends {
	pub permission_store: Arc<dyn PermissionStore>,
	pub access: Arc<dyn AccessBackend>,
	pub launcher: Arc<dyn Launcher>,
	pub location: Arc<dyn LocationSource>,
	pub notifications: Arc<dyn NotificationBackend>,
	pub proxy: Arc<dyn ProxyLookup>,
	pub descriptors: Arc<dyn DescriptorResolver>,
	pub documents: Arc<dyn DocumentStore>,
}

/// The broker's handlers and the engine they share.
#[derive(Clone)]
pub struct Broker {
	pub engine: Engine,
	pub transfers: FileTransfer,
	pub actions: Arc<Actions>,
	pub geolocation: Arc<Geolocation>,
	pub notifications: Arc<Notifications>,
	pub proxy: ProxyResolver,
}

impl Broker {
	pub fn new(bus: Arc<dyn Bus>, workers: WorkerPool, backends: Backends) -> Self {
		let permissions = Permissions::new(backends.permission_store.clone(), backends.access);
		Self {
			engine: Engine::new(RequestRegistry::new(bus.clone()), workers),
			transfers: FileTransfer::new(backends.descriptors, backends.documents),
			actions: Arc::new(Actions::new(permissions.clone(), backends.launcher)),
			geolocation: Arc::new(Geolocation::new(permissions, backends.location)),
			notifications: Arc::new(Notifications::new(
				backends.permission_store,
				backends.notifications,
				bus,
			)),
			proxy: ProxyResolver::new(backends.proxy),
		}
	}

	/// Closes the caller's request at `handle`.
	///
	/// A backend call running for the request (an open access dialog) is
	/// cancelled first; the close then waits for that operation to return.
	pub fn close_request(&self, caller: &Caller, handle: &str) -> Result<()> {
		let request = self.engine.requests().lookup(handle, &caller.connection)?;
		request.cancel();
		request.lock().close();
		Ok(())
	}

	/// Releases everything a vanished connection owned.
	pub fn on_connection_lost(&self, connection: &ConnectionId) {
		let requests = self.engine.requests().on_connection_lost(connection);
		let transfers = self.transfers.on_connection_lost(connection);
		let notifications = self.notifications.on_connection_lost(connection);
		debug!(
			target = "portal.broker",
			%connection,
			requests,
			transfers,
			notifications,
			"connection state released"
		);
	}
}
