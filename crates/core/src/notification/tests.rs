use parking_lot::Mutex;
use portal_protocol::ErrorName;
use portal_runtime::testing::{MemoryPermissionStore, RecordingBus};
use serde_json::json;

use super::*;

#[derive(Default)]
struct RecordingBackend {
	shown: Mutex<Vec<(String, String)>>,
	failing: bool,
}

impl NotificationBackend for RecordingBackend {
	fn add_notification(&self, app_id: &str, id: &str, _record: &NotificationRecord) -> Result<()> {
		if self.failing {
			return Err(Error::backend("no notification daemon"));
		}
		self.shown.lock().push((app_id.to_string(), id.to_string()));
		Ok(())
	}

	fn remove_notification(&self, app_id: &str, id: &str) -> Result<()> {
		self.shown.lock().retain(|(a, i)| !(a == app_id && i == id));
		Ok(())
	}
}

fn caller(app: &str, connection: &str) -> Caller {
	Caller::new(AppIdentity::sandboxed(app, Vec::new()), ConnectionId::new(connection))
}

fn record() -> NotificationRecord {
	Notifications::validate(json!({"title": "Hi", "buttons": [{"label": "Open", "action": "open"}]})).unwrap()
}

#[test]
fn invalid_record_is_invalid_argument() {
	let err = Notifications::validate(json!({"title": "t", "urgency": 1})).unwrap_err();
	assert_eq!(err.kind(), ErrorName::InvalidArgument);
	assert!(err.to_string().starts_with("invalid notification: "), "{err}");
}

#[test]
fn shown_notification_routes_actions_to_its_sender() {
	let bus = RecordingBus::new();
	let backend = Arc::new(RecordingBackend::default());
	let notifications = Notifications::new(MemoryPermissionStore::new(), backend.clone(), bus.clone());
	let app = caller("org.example.Chat", ":1.7");

	assert_eq!(notifications.add(&app, "msg-1", &record()), Delivery::Shown);
	assert_eq!(backend.shown.lock().len(), 1);

	assert!(notifications.action_invoked("org.example.Chat", "msg-1", "open", &[json!("x")]));
	let signals = bus.signals_for(&app.connection);
	assert_eq!(signals.len(), 1);
	assert_eq!(signals[0].member, "ActionInvoked");
	assert_eq!(signals[0].body["id"], "msg-1");
	assert_eq!(signals[0].body["action"], "open");

	assert!(!notifications.action_invoked("org.example.Chat", "msg-2", "open", &[]));
	assert!(!notifications.action_invoked("org.example.Other", "msg-1", "open", &[]));
}

#[test]
fn silenced_sandboxed_app_is_dropped() {
	let store = MemoryPermissionStore::new().with(TABLE, PERMISSION_ID, "org.example.Spam", &["no"]);
	let backend = Arc::new(RecordingBackend::default());
	let notifications = Notifications::new(store, backend.clone(), RecordingBus::new());

	let spam = caller("org.example.Spam", ":1.8");
	assert_eq!(notifications.add(&spam, "n", &record()), Delivery::Suppressed);
	assert!(backend.shown.lock().is_empty());
	assert_eq!(notifications.active_len(), 0);
}

#[test]
fn host_is_never_silenced() {
	let store = MemoryPermissionStore::new().with(TABLE, PERMISSION_ID, "", &["no"]);
	let notifications = Notifications::new(store, Arc::new(RecordingBackend::default()), RecordingBus::new());
	let host = Caller::new(AppIdentity::host(), ConnectionId::new(":1.9"));
	assert_eq!(notifications.add(&host, "n", &record()), Delivery::Shown);
}

#[test]
fn backend_failure_is_not_tracked() {
	let backend = Arc::new(RecordingBackend {
		failing: true,
		..Default::default()
	});
	let notifications = Notifications::new(MemoryPermissionStore::new(), backend, RecordingBus::new());
	let app = caller("org.example.Chat", ":1.7");
	assert_eq!(notifications.add(&app, "n", &record()), Delivery::Failed);
	assert!(!notifications.action_invoked("org.example.Chat", "n", "open", &[]));
}

#[test]
fn remove_and_connection_loss_forget_entries() {
	let bus = RecordingBus::new();
	let notifications = Notifications::new(
		MemoryPermissionStore::new(),
		Arc::new(RecordingBackend::default()),
		bus.clone(),
	);
	let a = caller("org.example.A", ":1.1");
	let b = caller("org.example.B", ":1.2");
	notifications.add(&a, "one", &record());
	notifications.add(&a, "two", &record());
	notifications.add(&b, "one", &record());

	assert!(notifications.remove(&a, "one"));
	assert!(!notifications.action_invoked("org.example.A", "one", "open", &[]));

	assert_eq!(notifications.on_connection_lost(&a.connection), 1);
	assert_eq!(notifications.active_len(), 1);
	assert!(notifications.action_invoked("org.example.B", "one", "open", &[]));
}
