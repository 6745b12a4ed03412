use std::time::Duration;

use portal_runtime::testing::{MemoryPermissionStore, RecordingBus, ScriptedAccess};
use portal_runtime::{AppIdentity, ConnectionId, Engine, RequestRegistry, WorkerPool};

use super::*;
use crate::test_support;

struct FixedSource(Option<Location>);

impl LocationSource for FixedSource {
	fn current(&self) -> Option<Location> {
		self.0.clone()
	}
}

fn fix(latitude: f64) -> Location {
	Location {
		latitude,
		longitude: 13.4,
		altitude: 34.0,
		accuracy: 20.0,
		speed: 0.0,
		heading: 0.0,
		description: "fixed".to_string(),
	}
}

struct Fixture {
	engine: Engine,
	bus: Arc<RecordingBus>,
	store: Arc<MemoryPermissionStore>,
	geolocation: Arc<Geolocation>,
	caller: Caller,
}

fn fixture(store: Arc<MemoryPermissionStore>, access: Arc<ScriptedAccess>) -> Fixture {
	let bus = RecordingBus::new();
	let engine = Engine::new(RequestRegistry::new(bus.clone()), WorkerPool::new(2).unwrap());
	let geolocation = Arc::new(Geolocation::new(
		Permissions::new(store.clone(), access),
		Arc::new(FixedSource(Some(fix(52.5)))),
	));
	let caller = Caller::new(
		AppIdentity::sandboxed("org.example.Maps", Vec::new()),
		ConnectionId::new(":1.4"),
	);
	Fixture {
		engine,
		bus,
		store,
		geolocation,
		caller,
	}
}

fn allowed_store() -> Arc<MemoryPermissionStore> {
	MemoryPermissionStore::new().with(TABLE, PERMISSION_ID, "org.example.Maps", &["EXACT", "0"])
}

fn track(fx: &Fixture) -> Arc<Request> {
	fx.engine
		.invoke(fx.geolocation.clone(), &fx.caller, Some("loc"), TrackLocation::default(), |_| {})
		.unwrap()
}

async fn wait_subscribed(fx: &Fixture) {
	for _ in 0..400 {
		if !fx.geolocation.tracker().is_empty() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	// Let the worker release the request lock.
	tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn denied_request_is_cancelled_and_not_tracked() {
	let store = MemoryPermissionStore::new().with(TABLE, PERMISSION_ID, "org.example.Maps", &["NONE", "0"]);
	let fx = fixture(store, ScriptedAccess::answering(ResponseCode::Success));
	let request = track(&fx);

	assert_eq!(test_support::response(&fx.bus, request.id()).await, Some(ResponseCode::Cancelled));
	assert!(fx.geolocation.tracker().is_empty());
	assert_eq!(fx.bus.members(request.id()), vec!["Response"]);
}

#[tokio::test]
async fn allowed_request_receives_current_and_later_fixes() {
	let fx = fixture(allowed_store(), ScriptedAccess::answering(ResponseCode::Cancelled));
	let request = track(&fx);
	wait_subscribed(&fx).await;

	assert_eq!(fx.bus.members(request.id()), vec!["Response", "LocationUpdated"]);
	assert_eq!(fx.bus.responses(request.id()), vec![ResponseCode::Success]);
	assert!(!request.is_closed());

	assert_eq!(fx.geolocation.location_changed(&fix(48.1)), 1);
	let signals = fx.bus.signals_for(&fx.caller.connection);
	assert_eq!(signals.len(), 3);
	assert_eq!(signals[2].body["latitude"], 48.1);
}

#[tokio::test]
async fn closing_stops_updates_and_prunes_subscription() {
	let fx = fixture(allowed_store(), ScriptedAccess::answering(ResponseCode::Cancelled));
	let request = track(&fx);
	wait_subscribed(&fx).await;

	fx.engine
		.requests()
		.lookup(request.id(), &fx.caller.connection)
		.unwrap()
		.lock()
		.close();

	// granted requests already answered; the close adds no second response
	assert_eq!(fx.bus.responses(request.id()), vec![ResponseCode::Success]);
	assert!(request.is_closed());
	assert_eq!(fx.geolocation.location_changed(&fix(1.0)), 0);
	assert!(fx.geolocation.tracker().is_empty());
}

#[tokio::test]
async fn connection_loss_ends_tracking() {
	let fx = fixture(allowed_store(), ScriptedAccess::answering(ResponseCode::Cancelled));
	let request = track(&fx);
	wait_subscribed(&fx).await;

	fx.engine.requests().on_connection_lost(&fx.caller.connection);
	assert!(request.is_closed());
	assert_eq!(fx.geolocation.location_changed(&fix(1.0)), 0);
}

#[tokio::test]
async fn granted_dialog_persists_exact_with_timestamp() {
	let fx = fixture(MemoryPermissionStore::new(), ScriptedAccess::answering(ResponseCode::Success));
	let request = track(&fx);

	let members = test_support::signals(&fx.bus, request.id(), 2).await;
	assert_eq!(members, vec!["Response", "LocationUpdated"]);
	let stored = fx.store.get(TABLE, PERMISSION_ID, "org.example.Maps").unwrap();
	assert_eq!(stored[0], "EXACT");
	assert!(stored[1].parse::<u64>().unwrap() > 0);
}

#[tokio::test]
async fn dialog_failure_is_code_other_and_not_tracked() {
	let fx = fixture(MemoryPermissionStore::new(), ScriptedAccess::failing("no dialog backend"));
	let request = track(&fx);

	assert_eq!(test_support::response(&fx.bus, request.id()).await, Some(ResponseCode::Other));
	assert!(fx.geolocation.tracker().is_empty());
	assert_eq!(fx.store.writes(), 0);
}

#[tokio::test]
async fn granted_without_fix_still_answers() {
	let bus = RecordingBus::new();
	let engine = Engine::new(RequestRegistry::new(bus.clone()), WorkerPool::new(2).unwrap());
	let geolocation = Arc::new(Geolocation::new(
		Permissions::new(allowed_store(), ScriptedAccess::answering(ResponseCode::Cancelled)),
		Arc::new(FixedSource(None)),
	));
	let caller = Caller::new(
		AppIdentity::sandboxed("org.example.Maps", Vec::new()),
		ConnectionId::new(":1.4"),
	);
	let request = engine
		.invoke(geolocation.clone(), &caller, None, TrackLocation::default(), |_| {})
		.unwrap();

	assert_eq!(test_support::response(&bus, request.id()).await, Some(ResponseCode::Success));
	assert_eq!(bus.members(request.id()), vec!["Response"]);
	assert!(!request.is_closed());
	assert_eq!(geolocation.location_changed(&fix(10.0)), 1);
}
