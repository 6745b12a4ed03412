use std::sync::Arc;

use portal_protocol::ResponseCode;

use super::*;
use crate::identity::{AppIdentity, ConnectionId};
use crate::request::RequestRegistry;
use crate::testing::{MemoryPermissionStore, RecordingBus, ScriptedAccess};

const KEY: PermissionKey<'static> = PermissionKey {
	table: "actions",
	id: "org.example.Target::open",
	app_id: "org.example.Caller",
};

fn tokens(values: &[&str]) -> Vec<String> {
	values.iter().map(|v| v.to_string()).collect()
}

fn ask(store: Arc<MemoryPermissionStore>, access: Arc<ScriptedAccess>) -> Result<Access> {
	let registry = RequestRegistry::new(RecordingBus::new());
	let request = registry.create(
		AppIdentity::sandboxed(KEY.app_id, Vec::new()),
		ConnectionId::new(":1.1"),
		None,
	);
	let mut guard = request.lock();
	guard.export().unwrap();
	let permissions = Permissions::new(store, access);
	permissions.ask_or_recall(&mut guard, KEY, &YesNoAsk, &AccessDialog::default())
}

#[test]
fn yes_no_ask_decodes_single_tokens() {
	assert_eq!(YesNoAsk.decode(&tokens(&["yes"])), Decision::Allow);
	assert_eq!(YesNoAsk.decode(&tokens(&["no"])), Decision::Deny);
	assert_eq!(YesNoAsk.decode(&tokens(&["ask"])), Decision::Ask);
	assert_eq!(YesNoAsk.decode(&[]), Decision::Unset);
	assert_eq!(YesNoAsk.decode(&tokens(&["maybe"])), Decision::Unset);
	assert_eq!(YesNoAsk.decode(&tokens(&["yes", "no"])), Decision::Unset);
	assert_eq!(YesNoAsk.encode(Access::Deny), tokens(&["no"]));
}

#[test]
fn geolocation_schema_needs_accuracy_and_timestamp() {
	let schema = GeolocationSchema;
	assert_eq!(schema.decode(&tokens(&["EXACT", "0"])), Decision::Allow);
	assert_eq!(schema.decode(&tokens(&["CITY", "0"])), Decision::Allow);
	assert_eq!(schema.decode(&tokens(&["NONE", "0"])), Decision::Deny);
	assert_eq!(schema.decode(&tokens(&["EXACT"])), Decision::Unset);
	assert_eq!(schema.decode(&tokens(&["FUZZY", "0"])), Decision::Unset);

	let encoded = schema.encode(Access::Allow);
	assert_eq!(encoded[0], "EXACT");
	assert!(encoded[1].parse::<u64>().is_ok());
}

#[test]
fn stored_decision_skips_dialog() {
	let store = MemoryPermissionStore::new().with(KEY.table, KEY.id, KEY.app_id, &["yes"]);
	let access = ScriptedAccess::answering(ResponseCode::Cancelled);

	assert_eq!(ask(store, access.clone()).unwrap(), Access::Allow);
	assert!(access.dialogs().is_empty());
}

#[test]
fn unset_asks_and_persists_answer() {
	let store = MemoryPermissionStore::new();
	let access = ScriptedAccess::answering(ResponseCode::Success);

	assert_eq!(ask(store.clone(), access.clone()).unwrap(), Access::Allow);
	assert_eq!(access.dialogs().len(), 1);
	assert_eq!(store.get(KEY.table, KEY.id, KEY.app_id), Some(tokens(&["yes"])));
}

#[test]
fn ask_prompts_every_time_and_never_persists() {
	let store = MemoryPermissionStore::new().with(KEY.table, KEY.id, KEY.app_id, &["ask"]);
	let access = ScriptedAccess::answering(ResponseCode::Cancelled);

	assert_eq!(ask(store.clone(), access.clone()).unwrap(), Access::Deny);
	assert_eq!(ask(store.clone(), access.clone()).unwrap(), Access::Deny);
	assert_eq!(access.dialogs().len(), 2);
	assert_eq!(store.get(KEY.table, KEY.id, KEY.app_id), Some(tokens(&["ask"])));
}

#[test]
fn malformed_record_is_treated_as_unset() {
	let store = MemoryPermissionStore::new().with(KEY.table, KEY.id, KEY.app_id, &["yes", "please"]);
	let access = ScriptedAccess::answering(ResponseCode::Cancelled);

	assert_eq!(ask(store.clone(), access.clone()).unwrap(), Access::Deny);
	assert_eq!(access.dialogs().len(), 1);
	assert_eq!(store.get(KEY.table, KEY.id, KEY.app_id), Some(tokens(&["no"])));
}

#[test]
fn failed_dialog_is_an_error_and_persists_nothing() {
	let store = MemoryPermissionStore::new();
	let access = ScriptedAccess::failing("no dialog backend");

	let err = ask(store.clone(), access).unwrap_err();
	assert!(matches!(err, crate::Error::Backend(_)));
	assert_eq!(store.get(KEY.table, KEY.id, KEY.app_id), None);
	assert_eq!(store.writes(), 0);
}

#[test]
fn first_answer_is_stored_once_and_recalled_after() {
	let store = MemoryPermissionStore::new();
	let access = ScriptedAccess::answering(ResponseCode::Success);

	assert_eq!(ask(store.clone(), access.clone()).unwrap(), Access::Allow);
	assert_eq!(ask(store.clone(), access.clone()).unwrap(), Access::Allow);
	assert_eq!(access.dialogs().len(), 1);
	assert_eq!(store.writes(), 1);
	assert_eq!(store.get(KEY.table, KEY.id, KEY.app_id), Some(tokens(&["yes"])));
}

#[test]
fn cancelled_request_skips_dialog_and_store() {
	let registry = RequestRegistry::new(RecordingBus::new());
	let request = registry.create(
		AppIdentity::sandboxed(KEY.app_id, Vec::new()),
		ConnectionId::new(":1.1"),
		None,
	);
	request.lock().export().unwrap();
	request.cancel();

	let store = MemoryPermissionStore::new();
	let access = ScriptedAccess::answering(ResponseCode::Success);
	let permissions = Permissions::new(store.clone(), access.clone());
	let mut guard = request.lock();
	let access_result = permissions.ask_or_recall(&mut guard, KEY, &YesNoAsk, &AccessDialog::default());

	assert_eq!(access_result.unwrap(), Access::Deny);
	assert!(access.dialogs().is_empty());
	assert_eq!(store.writes(), 0);
}

#[test]
fn store_failure_reads_as_unset() {
	let store = MemoryPermissionStore::new().with(KEY.table, KEY.id, KEY.app_id, &["no"]);
	store.fail();
	let access = ScriptedAccess::answering(ResponseCode::Success);

	assert_eq!(ask(store, access.clone()).unwrap(), Access::Allow);
	assert_eq!(access.dialogs().len(), 1);
}
