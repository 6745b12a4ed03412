//! Keyed sessions whose state outlives a single call.
//!
//! A [`SessionRegistry`] hands out random keys for values owned by one
//! connection. The owner mutates and stops the session; the key can be
//! shared with other clients, which may read it through [`SessionRegistry::get`].
//!
//! Locking follows the request engine: the map is touched only for single
//! operations, each session has its own mutex, and stopping a session marks
//! it closed under that mutex while registry removal happens after unlock.
//! The registry's reference is released on the event loop.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::identity::{AppIdentity, ConnectionId};


/// Attempts at drawing a fresh key before [`SessionRegistry::insert`] gives up.
const MAX_KEY_ATTEMPTS: usize = 4;

type SessionMap<S> = DashMap<Arc<str>, Arc<Session<S>>>;

/// Generates a random session key.
pub fn generate_key() -> String {
	uuid::Uuid::new_v4().simple().to_string()
}

/// Registry of live sessions holding values of type `S`.
pub struct SessionRegistry<S> {
	sessions: Arc<SessionMap<S>>,
}

impl<S> Clone for SessionRegistry<S> {
	fn clone(&self) -> Self {
		Self {
			sessions: self.sessions.clone(),
		}
	}
}

impl<S: Send + 'static> Default for SessionRegistry<S> {
	fn default() -> Self {
		Self::new()
	}
}

impl<S: Send + 'static> SessionRegistry<S> {
	pub fn new() -> Self {
		Self {
			sessions: Arc::new(DashMap::new()),
		}
	}

	/// Registers `value` under a fresh random key.
	///
	/// # Errors
	///
	/// Returns [`Error::KeyCollision`] if every generated key was taken.
	pub fn insert(&self, owner: AppIdentity, connection: ConnectionId, value: S) -> Result<Arc<Session<S>>> {
		self.insert_with_keys(owner, connection, value, generate_key)
	}

	/// Registers `value` under the first key from `next_key` that is free.
	/// An existing session is never overwritten.
	pub fn insert_with_keys(
		&self,
		owner: AppIdentity,
		connection: ConnectionId,
		value: S,
		mut next_key: impl FnMut() -> String,
	) -> Result<Arc<Session<S>>> {
		let mut last = String::new();
		for _ in 0..MAX_KEY_ATTEMPTS {
			let key: Arc<str> = Arc::from(next_key());
			match self.sessions.entry(key.clone()) {
				Entry::Occupied(_) => {
					warn!(target = "portal.session", key = %key, "session key collision");
					last = key.to_string();
				}
				Entry::Vacant(slot) => {
					let session = Arc::new(Session {
						key,
						owner,
						connection,
						closed: AtomicBool::new(false),
						state: Mutex::new(value),
						sessions: Arc::downgrade(&self.sessions),
					});
					slot.insert(session.clone());
					debug!(target = "portal.session", key = %session.key, owner = %session.owner, "session started");
					return Ok(session);
				}
			}
		}
		Err(Error::KeyCollision(last))
	}

	/// Returns the live session under `key`, whoever owns it.
	pub fn get(&self, key: &str) -> Option<Arc<Session<S>>> {
		self.sessions
			.get(key)
			.map(|entry| entry.value().clone())
			.filter(|session| !session.is_closed())
	}

	/// Returns the live session under `key` only if `caller` owns it.
	pub fn get_owned(&self, key: &str, caller: &ConnectionId) -> Option<Arc<Session<S>>> {
		self.get(key).filter(|session| session.connection() == caller)
	}

	/// Stops every session owned by `connection`. Returns how many were stopped.
	pub fn on_connection_lost(&self, connection: &ConnectionId) -> usize {
		let owned: Vec<Arc<Session<S>>> = self
			.sessions
			.iter()
			.filter(|entry| entry.value().connection() == connection)
			.map(|entry| entry.value().clone())
			.collect();

		let mut stopped = 0;
		for session in &owned {
			if let Some(mut guard) = session.lock() {
				guard.stop();
				stopped += 1;
			}
		}
		stopped
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn contains(&self, key: &str) -> bool {
		self.sessions.contains_key(key)
	}
}

/// A session and its owner.
#[derive(Debug)]
pub struct Session<S> {
	key: Arc<str>,
	owner: AppIdentity,
	connection: ConnectionId,
	closed: AtomicBool,
	state: Mutex<S>,
	sessions: Weak<SessionMap<S>>,
}

impl<S: Send + 'static> Session<S> {
	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn owner(&self) -> &AppIdentity {
		&self.owner
	}

	pub fn connection(&self) -> &ConnectionId {
		&self.connection
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Takes the session lock. Returns `None` if the session was stopped,
	/// possibly while waiting for the lock.
	pub fn lock(&self) -> Option<SessionGuard<'_, S>> {
		let state = self.state.lock();
		if self.is_closed() {
			return None;
		}
		Some(SessionGuard {
			state,
			release: Release { session: self },
		})
	}
}

/// Exclusive access to a live session's value.
pub struct SessionGuard<'a, S: Send + 'static> {
	// Field order matters: the session lock is released before `Release` runs.
	state: MutexGuard<'a, S>,
	release: Release<'a, S>,
}

impl<S: Send + 'static> SessionGuard<'_, S> {
	pub fn session(&self) -> &Session<S> {
		self.release.session
	}

	/// Ends the session. It is unresolvable from here on and leaves the
	/// registry once this guard drops.
	pub fn stop(&mut self) {
		let session = self.release.session;
		if !session.closed.swap(true, Ordering::AcqRel) {
			debug!(target = "portal.session", key = %session.key, "session stopped");
		}
	}
}

impl<S: Send + 'static> Deref for SessionGuard<'_, S> {
	type Target = S;

	fn deref(&self) -> &S {
		&self.state
	}
}

impl<S: Send + 'static> DerefMut for SessionGuard<'_, S> {
	fn deref_mut(&mut self) -> &mut S {
		&mut self.state
	}
}

struct Release<'a, S: Send + 'static> {
	session: &'a Session<S>,
}

impl<S: Send + 'static> Drop for Release<'_, S> {
	fn drop(&mut self) {
		let session = self.session;
		if !session.is_closed() {
			return;
		}
		let Some(sessions) = session.sessions.upgrade() else {
			return;
		};
		if let Some((_, entry)) = sessions.remove_if(&session.key, |_, entry| std::ptr::eq(Arc::as_ptr(entry), session)) {
			defer_drop(entry);
		}
	}
}

/// Drops `value` from a task on the event loop, or inline outside a runtime.
fn defer_drop<T: Send + 'static>(value: T) {
	match tokio::runtime::Handle::try_current() {
		Ok(handle) => {
			handle.spawn(async move { drop(value) });
		}
		Err(_) => drop(value),
	}
}
