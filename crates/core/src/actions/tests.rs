use parking_lot::Mutex;
use portal_runtime::testing::{MemoryPermissionStore, RecordingBus, ScriptedAccess};
use portal_runtime::{AppIdentity, ConnectionId, Engine, RequestRegistry, WorkerPool};
use serde_json::json;

use super::*;
use crate::test_support;

#[derive(Default)]
struct RecordingLauncher {
	calls: Mutex<Vec<(String, String, String, Vec<Value>)>>,
	failing: bool,
}

impl Launcher for RecordingLauncher {
	fn activate_action(
		&self,
		application_id: &str,
		object_path: &str,
		action: &str,
		parameters: &[Value],
		_platform_data: &Map<String, Value>,
	) -> Result<()> {
		if self.failing {
			return Err(Error::backend("target not running"));
		}
		self.calls.lock().push((
			application_id.to_string(),
			object_path.to_string(),
			action.to_string(),
			parameters.to_vec(),
		));
		Ok(())
	}
}

struct Fixture {
	engine: Engine,
	bus: Arc<RecordingBus>,
	store: Arc<MemoryPermissionStore>,
	access: Arc<ScriptedAccess>,
	launcher: Arc<RecordingLauncher>,
	actions: Arc<Actions>,
	caller: Caller,
}

fn fixture(store: Arc<MemoryPermissionStore>, access: Arc<ScriptedAccess>, launcher: RecordingLauncher) -> Fixture {
	let bus = RecordingBus::new();
	let engine = Engine::new(RequestRegistry::new(bus.clone()), WorkerPool::new(2).unwrap());
	let launcher = Arc::new(launcher);
	let actions = Arc::new(Actions::new(
		Permissions::new(store.clone(), access.clone()),
		launcher.clone(),
	));
	let caller = Caller::new(
		AppIdentity::sandboxed("org.example.Caller", Vec::new()),
		ConnectionId::new(":1.3"),
	);
	Fixture {
		engine,
		bus,
		store,
		access,
		launcher,
		actions,
		caller,
	}
}

fn args(application: &str, action: &str) -> ActivateAction {
	ActivateAction {
		parent_window: "x11:1".into(),
		application_id: application.into(),
		action_id: action.into(),
		parameters: vec![json!(1)],
		platform_data: Map::new(),
	}
}

#[tokio::test]
async fn granted_dialog_activates_and_persists_yes() {
	let fx = fixture(
		MemoryPermissionStore::new(),
		ScriptedAccess::answering(ResponseCode::Success),
		RecordingLauncher::default(),
	);
	let request = fx
		.engine
		.invoke(fx.actions.clone(), &fx.caller, None, args("org.example.my-app", "open"), |_| {})
		.unwrap();

	assert_eq!(test_support::response(&fx.bus, request.id()).await, Some(ResponseCode::Success));
	let calls = fx.launcher.calls.lock();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].1, "/org/example/my_app");
	assert_eq!(calls[0].2, "open");
	assert_eq!(calls[0].3, vec![json!(1)]);
	assert_eq!(
		fx.store.get(TABLE, "org.example.my-app::open", "org.example.Caller"),
		Some(vec!["yes".to_string()])
	);

	let dialogs = fx.access.dialogs();
	assert_eq!(dialogs[0].title, "Activate the 'open' action in org.example.my-app?");
	assert_eq!(dialogs[0].icon.as_deref(), Some("emblem-system-symbolic"));
}

#[tokio::test]
async fn stored_no_is_cancelled_without_dialog() {
	let store = MemoryPermissionStore::new().with(TABLE, "org.example.Target::open", "org.example.Caller", &["no"]);
	let fx = fixture(
		store,
		ScriptedAccess::answering(ResponseCode::Success),
		RecordingLauncher::default(),
	);
	let request = fx
		.engine
		.invoke(fx.actions.clone(), &fx.caller, None, args("org.example.Target", "open"), |_| {})
		.unwrap();

	assert_eq!(test_support::response(&fx.bus, request.id()).await, Some(ResponseCode::Cancelled));
	assert!(fx.access.dialogs().is_empty());
	assert!(fx.launcher.calls.lock().is_empty());
}

#[tokio::test]
async fn activation_failure_is_code_other() {
	let store = MemoryPermissionStore::new().with(TABLE, "org.example.Target::open", "org.example.Caller", &["yes"]);
	let fx = fixture(
		store,
		ScriptedAccess::answering(ResponseCode::Success),
		RecordingLauncher {
			failing: true,
			..Default::default()
		},
	);
	let request = fx
		.engine
		.invoke(fx.actions.clone(), &fx.caller, None, args("org.example.Target", "open"), |_| {})
		.unwrap();

	assert_eq!(test_support::response(&fx.bus, request.id()).await, Some(ResponseCode::Other));
}

#[tokio::test]
async fn invalid_application_id_is_rejected_synchronously() {
	let fx = fixture(
		MemoryPermissionStore::new(),
		ScriptedAccess::answering(ResponseCode::Success),
		RecordingLauncher::default(),
	);
	let err = fx
		.engine
		.invoke(fx.actions.clone(), &fx.caller, None, args("not an id", "open"), |_| {})
		.unwrap_err();

	assert_eq!(err.kind(), portal_protocol::ErrorName::InvalidArgument);
	assert!(fx.engine.requests().is_empty());
	assert!(fx.bus.signals().is_empty());
}

#[tokio::test]
async fn dialog_failure_is_code_other_and_not_stored() {
	let fx = fixture(
		MemoryPermissionStore::new(),
		ScriptedAccess::failing("dialog backend gone"),
		RecordingLauncher::default(),
	);
	let request = fx
		.engine
		.invoke(fx.actions.clone(), &fx.caller, None, args("org.example.Target", "open"), |_| {})
		.unwrap();

	assert_eq!(test_support::response(&fx.bus, request.id()).await, Some(ResponseCode::Other));
	assert!(fx.launcher.calls.lock().is_empty());
	assert_eq!(fx.store.writes(), 0);
}
