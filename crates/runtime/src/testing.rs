//! In-memory collaborators for tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use portal_protocol::{ResponseCode, Signal};

use crate::bus::{BackendHandle, Bus};
use crate::error::{Error, Result};
use crate::identity::ConnectionId;
use crate::permission::{AccessBackend, AccessDialog, PermissionEntry, PermissionStore};

/// Bus that records every delivered signal.
#[derive(Default)]
pub struct RecordingBus {
	signals: Mutex<Vec<(ConnectionId, Signal)>>,
	gone: Mutex<HashSet<ConnectionId>>,
}

impl RecordingBus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Drops further deliveries to `connection`.
	pub fn disconnect(&self, connection: &ConnectionId) {
		self.gone.lock().insert(connection.clone());
	}

	pub fn signals(&self) -> Vec<(ConnectionId, Signal)> {
		self.signals.lock().clone()
	}

	pub fn signals_for(&self, connection: &ConnectionId) -> Vec<Signal> {
		self.signals
			.lock()
			.iter()
			.filter(|(dest, _)| dest == connection)
			.map(|(_, signal)| signal.clone())
			.collect()
	}

	/// Response codes emitted for the request at `path`, in order.
	pub fn responses(&self, path: &str) -> Vec<ResponseCode> {
		self.signals
			.lock()
			.iter()
			.filter(|(_, signal)| signal.path == path)
			.filter_map(|(_, signal)| signal.response_code())
			.collect()
	}

	pub fn members(&self, path: &str) -> Vec<String> {
		self.signals
			.lock()
			.iter()
			.filter(|(_, signal)| signal.path == path)
			.map(|(_, signal)| signal.member.clone())
			.collect()
	}
}

impl Bus for RecordingBus {
	fn emit(&self, destination: &ConnectionId, signal: Signal) -> bool {
		if self.gone.lock().contains(destination) {
			return false;
		}
		self.signals.lock().push((destination.clone(), signal));
		true
	}
}

/// Permission store held in memory.
#[derive(Default)]
pub struct MemoryPermissionStore {
	entries: Mutex<BTreeMap<(String, String), PermissionEntry>>,
	failing: AtomicBool,
	writes: AtomicUsize,
}

impl MemoryPermissionStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn with(self: Arc<Self>, table: &str, id: &str, app_id: &str, tokens: &[&str]) -> Arc<Self> {
		self.entries
			.lock()
			.entry((table.to_string(), id.to_string()))
			.or_default()
			.insert(app_id.to_string(), tokens.iter().map(|t| t.to_string()).collect());
		self
	}

	/// Makes every lookup and write fail.
	pub fn fail(&self) {
		self.failing.store(true, Ordering::SeqCst);
	}

	/// Number of successful [`PermissionStore::set`] calls.
	pub fn writes(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}

	pub fn get(&self, table: &str, id: &str, app_id: &str) -> Option<Vec<String>> {
		self.entries
			.lock()
			.get(&(table.to_string(), id.to_string()))
			.and_then(|entry| entry.get(app_id).cloned())
	}
}

impl PermissionStore for MemoryPermissionStore {
	fn lookup(&self, table: &str, id: &str) -> Result<PermissionEntry> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::backend("permission store unavailable"));
		}
		Ok(self
			.entries
			.lock()
			.get(&(table.to_string(), id.to_string()))
			.cloned()
			.unwrap_or_default())
	}

	fn set(&self, table: &str, id: &str, app_id: &str, tokens: Vec<String>) -> Result<()> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(Error::backend("permission store unavailable"));
		}
		self.entries
			.lock()
			.entry((table.to_string(), id.to_string()))
			.or_default()
			.insert(app_id.to_string(), tokens);
		self.writes.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

/// Access backend answering every dialog the same way.
pub struct ScriptedAccess {
	reply: std::result::Result<ResponseCode, String>,
	dialogs: Mutex<Vec<AccessDialog>>,
	cancelled: Mutex<Vec<String>>,
}

impl ScriptedAccess {
	pub fn answering(code: ResponseCode) -> Arc<Self> {
		Arc::new(Self {
			reply: Ok(code),
			dialogs: Mutex::new(Vec::new()),
			cancelled: Mutex::new(Vec::new()),
		})
	}

	pub fn failing(message: &str) -> Arc<Self> {
		Arc::new(Self {
			reply: Err(message.to_string()),
			dialogs: Mutex::new(Vec::new()),
			cancelled: Mutex::new(Vec::new()),
		})
	}

	pub fn dialogs(&self) -> Vec<AccessDialog> {
		self.dialogs.lock().clone()
	}

	pub fn cancelled(&self) -> Vec<String> {
		self.cancelled.lock().clone()
	}
}

impl AccessBackend for ScriptedAccess {
	fn access_dialog(&self, _handle: &str, dialog: &AccessDialog) -> Result<ResponseCode> {
		self.dialogs.lock().push(dialog.clone());
		self.reply.clone().map_err(Error::Backend)
	}

	fn cancel(&self, handle: &str) {
		self.cancelled.lock().push(handle.to_string());
	}
}

/// Access backend whose dialog stays up until it is cancelled, or fails
/// after five seconds.
#[derive(Default)]
pub struct BlockingAccess {
	shown: Mutex<Vec<String>>,
	cancelled: Mutex<Vec<String>>,
	wake: Condvar,
}

impl BlockingAccess {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Handles of the dialogs shown so far.
	pub fn shown(&self) -> Vec<String> {
		self.shown.lock().clone()
	}

	pub fn cancelled(&self) -> Vec<String> {
		self.cancelled.lock().clone()
	}
}

impl AccessBackend for BlockingAccess {
	fn access_dialog(&self, handle: &str, _dialog: &AccessDialog) -> Result<ResponseCode> {
		self.shown.lock().push(handle.to_string());
		let deadline = Instant::now() + Duration::from_secs(5);
		let mut cancelled = self.cancelled.lock();
		while !cancelled.iter().any(|h| h == handle) {
			if self.wake.wait_until(&mut cancelled, deadline).timed_out() {
				return Err(Error::backend("dialog was never answered"));
			}
		}
		Ok(ResponseCode::Cancelled)
	}

	fn cancel(&self, handle: &str) {
		self.cancelled.lock().push(handle.to_string());
		self.wake.notify_all();
	}
}

/// Delegate that counts how often it was closed.
#[derive(Clone, Default)]
pub struct CountingHandle {
	closes: Arc<AtomicUsize>,
}

impl CountingHandle {
	pub fn closes(&self) -> usize {
		self.closes.load(Ordering::SeqCst)
	}
}

impl BackendHandle for CountingHandle {
	fn close(&self) {
		self.closes.fetch_add(1, Ordering::SeqCst);
	}
}
