//! Request lifecycle engine.
//!
//! A [`Request`] models one asynchronous interaction with a caller. It is
//! created when a call arrives, exported at a deterministic path on the
//! caller's connection, and retired after exactly one `Response` signal,
//! an explicit close, or the loss of the owning connection.
//!
//! # Locking
//!
//! The [`RequestRegistry`] map guards existence only and is held for single
//! insert/lookup/remove operations. Each request carries its own mutex,
//! taken through [`Request::lock`] for the full duration of an operation.
//! A [`RequestGuard`] never touches the registry while the entity lock is
//! held: retiring a request marks it closed under the lock, and the registry
//! entry is removed when the guard drops, after the lock is released.
//!
//! The backend delegate sits in its own small slot beside the entity lock,
//! so [`Request::cancel`] reaches a running dialog while a worker holds the
//! entity lock. Order: entity lock, then delegate slot; the delegate itself
//! is closed with neither held by the canceller.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use portal_protocol::{REQUEST_PATH_PREFIX, ResponseCode, Signal};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::bus::{BackendHandle, Bus};
use crate::error::{Error, Result};
use crate::identity::{AppIdentity, ConnectionId};


/// Lifecycle phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Created,
	Exported,
	/// Terminal. No further signals are emitted.
	Closed,
}

struct RequestState {
	phase: Phase,
	/// The single `Response` went out but the request stays exported.
	responded: bool,
}

#[derive(Default)]
struct DelegateSlot {
	handle: Option<Box<dyn BackendHandle>>,
	cancelled: bool,
}

/// One in-flight interaction, identified by its object path.
pub struct Request {
	id: Arc<str>,
	app: AppIdentity,
	sender: ConnectionId,
	closed: AtomicBool,
	state: Mutex<RequestState>,
	delegate: Mutex<DelegateSlot>,
	bus: Arc<dyn Bus>,
	requests: Weak<DashMap<Arc<str>, Arc<Request>>>,
	this: Weak<Request>,
}

impl std::fmt::Debug for Request {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Request")
			.field("id", &self.id)
			.field("app", &self.app)
			.field("sender", &self.sender)
			.field("closed", &self.is_closed())
			.finish()
	}
}

impl Request {
	/// Object path of the request. Doubles as the handle returned to callers.
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn app(&self) -> &AppIdentity {
		&self.app
	}

	/// Connection that created the request and receives its signals.
	pub fn sender(&self) -> &ConnectionId {
		&self.sender
	}

	/// Returns true once the request reached its terminal phase. Does not lock.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Returns true once [`Request::cancel`] ran. Does not take the entity lock.
	pub fn is_cancelled(&self) -> bool {
		self.delegate.lock().cancelled
	}

	/// Forwards cancellation to the attached delegate without waiting for the
	/// entity lock. Delegates attached afterwards are refused, and a response
	/// sent after this reads as cancelled. Returns true if a delegate was closed.
	pub fn cancel(&self) -> bool {
		let delegate = {
			let mut slot = self.delegate.lock();
			slot.cancelled = true;
			slot.handle.take()
		};
		match delegate {
			Some(delegate) => {
				debug!(target = "portal.request", request = %self.id, "forwarding cancel to backend");
				delegate.close();
				true
			}
			None => false,
		}
	}

	/// Takes the entity lock. Blocks while another operation holds it.
	pub fn lock(&self) -> RequestGuard<'_> {
		RequestGuard {
			state: self.state.lock(),
			retire: Retire { request: self },
		}
	}
}

/// Exclusive access to a request for the duration of one operation.
pub struct RequestGuard<'a> {
	// Field order matters: the entity lock is released before `Retire` runs.
	state: MutexGuard<'a, RequestState>,
	retire: Retire<'a>,
}

struct Retire<'a> {
	request: &'a Request,
}

impl Drop for Retire<'_> {
	fn drop(&mut self) {
		let request = self.request;
		if !request.is_closed() {
			return;
		}
		if let Some(requests) = request.requests.upgrade() {
			let removed = requests.remove_if(&request.id, |_, entry| std::ptr::eq(Arc::as_ptr(entry), request));
			if removed.is_some() {
				debug!(target = "portal.request", request = %request.id, "request retired");
			}
		}
	}
}

impl RequestGuard<'_> {
	pub fn id(&self) -> &str {
		self.retire.request.id()
	}

	pub fn app(&self) -> &AppIdentity {
		self.retire.request.app()
	}

	pub fn sender(&self) -> &ConnectionId {
		self.retire.request.sender()
	}

	pub fn phase(&self) -> Phase {
		self.state.phase
	}

	pub fn is_exported(&self) -> bool {
		self.state.phase == Phase::Exported
	}

	/// Weak handle to the request, for subscribing it to event sources.
	pub fn downgrade(&self) -> Weak<Request> {
		self.retire.request.this.clone()
	}

	/// Publishes the request on its owning connection.
	///
	/// # Errors
	///
	/// Returns [`Error::AlreadyExported`] unless the request is freshly created.
	pub fn export(&mut self) -> Result<()> {
		if self.state.phase != Phase::Created {
			error!(
				target = "portal.request",
				request = %self.id(),
				phase = ?self.state.phase,
				"export called twice"
			);
			return Err(Error::AlreadyExported(self.id().to_string()));
		}
		self.state.phase = Phase::Exported;
		debug!(target = "portal.request", request = %self.id(), sender = %self.sender(), "request exported");
		Ok(())
	}

	/// Attaches or clears the backend delegate used to forward cancellation.
	///
	/// Returns false if `delegate` was refused because the request is closed
	/// or already cancelled; the caller should not start the backend call.
	pub fn set_delegate(&mut self, delegate: Option<Box<dyn BackendHandle>>) -> bool {
		if self.state.phase == Phase::Closed {
			return delegate.is_none();
		}
		let mut slot = self.retire.request.delegate.lock();
		if slot.cancelled && delegate.is_some() {
			return false;
		}
		slot.handle = delegate;
		true
	}

	pub fn has_delegate(&self) -> bool {
		self.retire.request.delegate.lock().handle.is_some()
	}

	pub fn is_cancelled(&self) -> bool {
		self.retire.request.is_cancelled()
	}

	/// Returns true once the `Response` signal was emitted.
	pub fn has_responded(&self) -> bool {
		self.state.responded
	}

	/// Emits the single `Response` signal and retires the request.
	///
	/// Only an exported request that has not responded yet emits; a cancelled
	/// request reports [`ResponseCode::Cancelled`] whatever `code` says.
	/// Repeated calls are no-ops. Returns true if a signal was emitted.
	pub fn respond(&mut self, code: ResponseCode, results: Map<String, Value>) -> bool {
		if self.state.phase == Phase::Closed {
			return false;
		}
		let emitted = self.emit_response(code, results);
		debug!(target = "portal.request", request = %self.id(), %code, emitted, "request responded");
		self.retire();
		emitted
	}

	/// Emits the single `Response` signal but keeps the request exported for
	/// interim events until it is closed. Later responses and the close emit
	/// nothing. Returns true if a signal was emitted.
	pub fn respond_and_keep(&mut self, code: ResponseCode, results: Map<String, Value>) -> bool {
		if self.state.phase == Phase::Closed {
			return false;
		}
		let emitted = self.emit_response(code, results);
		debug!(target = "portal.request", request = %self.id(), %code, emitted, "request responded, kept open");
		emitted
	}

	fn emit_response(&mut self, code: ResponseCode, results: Map<String, Value>) -> bool {
		if self.state.phase != Phase::Exported || self.state.responded {
			return false;
		}
		let (code, results) = if self.is_cancelled() {
			(ResponseCode::Cancelled, Map::new())
		} else {
			(code, results)
		};
		self.state.responded = true;
		let signal = Signal::response(self.id(), code, results);
		self.retire.request.bus.emit(self.sender(), signal);
		true
	}

	/// Sends an interim event to the owning connection while exported.
	pub fn emit(&mut self, signal: Signal) -> bool {
		if self.state.phase != Phase::Exported {
			return false;
		}
		self.retire.request.bus.emit(self.sender(), signal)
	}

	/// Caller-initiated early termination.
	///
	/// Forwards cancellation to the delegate, then retires the request,
	/// emitting a cancelled response only if it is still exported.
	pub fn close(&mut self) {
		if self.state.phase == Phase::Closed {
			return;
		}
		self.retire.request.cancel();
		self.emit_response(ResponseCode::Cancelled, Map::new());
		debug!(target = "portal.request", request = %self.id(), "request closed");
		self.retire();
	}

	fn retire(&mut self) {
		self.state.phase = Phase::Closed;
		self.retire.request.delegate.lock().handle = None;
		self.retire.request.closed.store(true, Ordering::Release);
	}
}

/// Process-wide registry of live requests.
#[derive(Clone)]
pub struct RequestRegistry {
	requests: Arc<DashMap<Arc<str>, Arc<Request>>>,
	next_token: Arc<AtomicU64>,
	bus: Arc<dyn Bus>,
}

impl RequestRegistry {
	pub fn new(bus: Arc<dyn Bus>) -> Self {
		Self {
			requests: Arc::new(DashMap::new()),
			next_token: Arc::new(AtomicU64::new(0)),
			bus,
		}
	}

	pub fn bus(&self) -> &Arc<dyn Bus> {
		&self.bus
	}

	/// Registers a new, unexported request for `sender`.
	///
	/// The path ends in `handle_token` when it is a valid token not already in
	/// use on that connection, and in a generated `t<N>` otherwise.
	pub fn create(&self, app: AppIdentity, sender: ConnectionId, handle_token: Option<&str>) -> Arc<Request> {
		let base = format!("{REQUEST_PATH_PREFIX}/{}", sender.path_element());
		let mut requested = handle_token.filter(|token| is_valid_token(token));

		loop {
			let token = match requested.take() {
				Some(token) => token.to_string(),
				None => format!("t{}", self.next_token.fetch_add(1, Ordering::Relaxed)),
			};
			let id: Arc<str> = Arc::from(format!("{base}/{token}"));

			match self.requests.entry(id.clone()) {
				Entry::Occupied(_) => {
					debug!(target = "portal.request", request = %id, "request path in use, generating another");
				}
				Entry::Vacant(slot) => {
					let request = Arc::new_cyclic(|this| Request {
						id,
						app,
						sender,
						closed: AtomicBool::new(false),
						state: Mutex::new(RequestState {
							phase: Phase::Created,
							responded: false,
						}),
						delegate: Mutex::new(DelegateSlot::default()),
						bus: self.bus.clone(),
						requests: Arc::downgrade(&self.requests),
						this: this.clone(),
					});
					slot.insert(request.clone());
					return request;
				}
			}
		}
	}

	/// Resolves `id` for `caller`.
	///
	/// # Errors
	///
	/// Unknown, retired and foreign ids all yield the same [`Error::AccessDenied`].
	pub fn lookup(&self, id: &str, caller: &ConnectionId) -> Result<Arc<Request>> {
		let request = self.requests.get(id).map(|entry| entry.value().clone());
		match request {
			Some(request) if request.sender() == caller && !request.is_closed() => Ok(request),
			_ => Err(Error::AccessDenied("Invalid request".to_string())),
		}
	}

	/// Cancels, then closes, every request owned by `connection`. Returns how
	/// many were closed.
	pub fn on_connection_lost(&self, connection: &ConnectionId) -> usize {
		let owned: Vec<Arc<Request>> = self
			.requests
			.iter()
			.filter(|entry| entry.value().sender() == connection)
			.map(|entry| entry.value().clone())
			.collect();

		for request in &owned {
			request.cancel();
		}
		for request in &owned {
			request.lock().close();
		}
		if !owned.is_empty() {
			debug!(target = "portal.request", %connection, count = owned.len(), "closed requests of lost connection");
		}
		owned.len()
	}

	pub fn len(&self) -> usize {
		self.requests.len()
	}

	pub fn is_empty(&self) -> bool {
		self.requests.is_empty()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.requests.contains_key(id)
	}
}

fn is_valid_token(token: &str) -> bool {
	!token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
