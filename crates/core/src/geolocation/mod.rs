//! Location tracking.
//!
//! `TrackLocation` returns a request that, once the user allowed it, answers
//! `Response` 0 and stays exported, receiving a `LocationUpdated` signal for
//! the current fix and for every later one. Tracking ends when the caller
//! closes the request or disconnects; the close emits no second response.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use portal_protocol::{Location, ResponseCode, Signal};
use portal_runtime::{
	AccessDialog, Caller, Capability, Completion, GeolocationSchema, PermissionKey, Permissions, Request, RequestGuard,
	Result,
};
use serde_json::{Map, Value};
use tracing::{debug, trace};

#[cfg(test)]
mod tests;

/// Permission table and id for location access.
pub const TABLE: &str = "portals";
pub const PERMISSION_ID: &str = "geolocation";

/// Source of position fixes.
pub trait LocationSource: Send + Sync {
	/// Latest known fix, if any.
	fn current(&self) -> Option<Location>;
}

/// Requests currently receiving location updates.
#[derive(Default)]
pub struct LocationTracker {
	subscribers: Mutex<Vec<Weak<Request>>>,
}

impl LocationTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a request and prunes dead ones.
	pub fn subscribe(&self, request: Weak<Request>) {
		let mut subscribers = self.subscribers.lock();
		subscribers.retain(is_live);
		subscribers.push(request);
	}

	/// Sends `location` to every live subscriber. Returns how many received it.
	///
	/// The subscriber list is only held while taking a snapshot; each request
	/// is locked on its own afterwards.
	pub fn publish(&self, location: &Location) -> usize {
		let snapshot: Vec<Arc<Request>> = {
			let mut subscribers = self.subscribers.lock();
			subscribers.retain(is_live);
			subscribers.iter().filter_map(Weak::upgrade).collect()
		};

		let mut delivered = 0;
		for request in snapshot {
			let mut guard = request.lock();
			if guard.emit(Signal::location_updated(guard.id(), location)) {
				delivered += 1;
			}
		}
		trace!(target = "portal.geolocation", delivered, "location published");
		delivered
	}

	pub fn len(&self) -> usize {
		self.subscribers.lock().iter().filter(|w| is_live(w)).count()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

fn is_live(request: &Weak<Request>) -> bool {
	request.upgrade().is_some_and(|r| !r.is_closed())
}

/// Arguments of `TrackLocation`.
#[derive(Debug, Clone, Default)]
pub struct TrackLocation {
	pub parent_window: String,
}

pub struct Geolocation {
	permissions: Permissions,
	source: Arc<dyn LocationSource>,
	tracker: LocationTracker,
}

impl Geolocation {
	pub fn new(permissions: Permissions, source: Arc<dyn LocationSource>) -> Self {
		Self {
			permissions,
			source,
			tracker: LocationTracker::new(),
		}
	}

	pub fn tracker(&self) -> &LocationTracker {
		&self.tracker
	}

	/// Fans a new fix out to every tracking request.
	pub fn location_changed(&self, location: &Location) -> usize {
		self.tracker.publish(location)
	}

	fn dialog(app_id: &str, parent_window: &str) -> AccessDialog {
		let (title, subtitle) = if app_id.is_empty() {
			(
				"Grant Access to Your Location?".to_string(),
				"An application wants to use your location.".to_string(),
			)
		} else {
			(
				format!("Give {app_id} Access to Your Location?"),
				format!("{app_id} wants to use your location."),
			)
		};
		AccessDialog {
			app_id: app_id.to_string(),
			parent_window: parent_window.to_string(),
			title,
			subtitle,
			body: "Location access can be changed at any time from the privacy settings.".to_string(),
			icon: Some("find-location-symbolic".to_string()),
			grant_label: Some("Grant Access".to_string()),
			deny_label: Some("Deny Access".to_string()),
		}
	}
}

impl Capability for Geolocation {
	type Args = TrackLocation;
	type Input = TrackLocation;
	type Output = ResponseCode;

	const NAME: &'static str = "TrackLocation";

	fn validate(&self, _caller: &Caller, args: TrackLocation) -> Result<TrackLocation> {
		Ok(args)
	}

	fn execute(&self, request: &mut RequestGuard<'_>, input: TrackLocation) -> Completion<ResponseCode> {
		let app_id = request.app().id().to_string();
		let key = PermissionKey {
			table: TABLE,
			id: PERMISSION_ID,
			app_id: &app_id,
		};
		let dialog = Self::dialog(&app_id, &input.parent_window);

		match self.permissions.ask_or_recall(request, key, &GeolocationSchema, &dialog) {
			Ok(access) if access.is_allowed() => {}
			Ok(_) => {
				debug!(target = "portal.geolocation", app = %app_id, "location access denied");
				return Completion::Done(ResponseCode::Cancelled);
			}
			Err(_) => return Completion::Done(ResponseCode::Other),
		}

		self.tracker.subscribe(request.downgrade());
		// Granted: the response goes out now, updates follow until close.
		request.respond_and_keep(ResponseCode::Success, Map::new());
		if let Some(location) = self.source.current() {
			let signal = Signal::location_updated(request.id(), &location);
			request.emit(signal);
		}
		debug!(target = "portal.geolocation", request = %request.id(), "tracking location");
		Completion::Pending
	}

	fn build_response(&self, code: ResponseCode) -> (ResponseCode, Map<String, Value>) {
		(code, Map::new())
	}
}
