//! Maps decoded calls onto the broker.
//!
//! Request-based methods go through [`Engine::invoke`](portal_runtime::Engine::invoke)
//! and reply with the request handle before the body runs. Everything that
//! may block (transfers, closes, backend calls) runs on the worker pool and
//! replies when done, so the connection keeps reading meanwhile. Those jobs
//! are tracked per connection through [`Jobs`] so a lost connection is only
//! cleaned up once none of them can still add state for it.

use std::sync::Arc;

use portal::{ActivateAction, Broker, Notifications, TrackLocation, select_descriptors};
use portal_protocol::{Call, CallMessage, ErrorName, ReplyBody, ServerMessage};
use portal_runtime::{Caller, Capability, Error};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::ConnectionBus;
use crate::fd::Frame;

/// The blocking jobs dispatched for one connection. Each job holds a
/// sender clone until it finished.
pub struct Jobs {
	token: mpsc::Sender<()>,
	done: mpsc::Receiver<()>,
}

impl Jobs {
	pub fn new() -> Self {
		let (token, done) = mpsc::channel(1);
		Self { token, done }
	}

	fn token(&self) -> mpsc::Sender<()> {
		self.token.clone()
	}

	/// Waits until every job dispatched through this tracker has finished.
	pub async fn finished(self) {
		let Self { token, mut done } = self;
		drop(token);
		// Nothing is ever sent; `None` arrives once the last clone dropped.
		let _ = done.recv().await;
	}
}

impl Default for Jobs {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone)]
pub struct Dispatcher {
	broker: Broker,
	bus: Arc<ConnectionBus>,
}

impl Dispatcher {
	pub fn new(broker: Broker, bus: Arc<ConnectionBus>) -> Self {
		Self { broker, bus }
	}

	pub fn broker(&self) -> &Broker {
		&self.broker
	}

	/// Handles one call line. Replies are queued on the caller's connection.
	pub fn dispatch(&self, caller: &Caller, frame: Frame, jobs: &Jobs) {
		let message = match parse_call(&frame.line) {
			Ok(message) => message,
			Err((serial, reason)) => {
				debug!(target = "portal.daemon", connection = %caller.connection, %reason, "malformed call");
				self.bus.send(
					&caller.connection,
					ServerMessage::error(serial, ErrorName::InvalidArgument, reason),
				);
				return;
			}
		};

		let serial = message.serial;
		let method = message.call.method();
		debug!(target = "portal.daemon", connection = %caller.connection, app = %caller.app, method, serial, "call");

		match message.call {
			Call::ActivateAction {
				parent_window,
				application_id,
				action_id,
				parameters,
				options,
			} => {
				let args = ActivateAction {
					parent_window,
					application_id,
					action_id,
					parameters,
					platform_data: options.platform_data.unwrap_or_default(),
				};
				let actions = self.broker.actions.clone();
				self.invoke(caller, serial, actions, options.handle_token.as_deref(), args);
			}
			Call::TrackLocation { parent_window, options } => {
				let geolocation = self.broker.geolocation.clone();
				let args = TrackLocation { parent_window };
				self.invoke(caller, serial, geolocation, options.handle_token.as_deref(), args);
			}
			Call::AddNotification { id, notification } => match Notifications::validate(notification) {
				Ok(record) => {
					self.bus.send(&caller.connection, ServerMessage::reply(serial, ReplyBody::Empty));
					let notifications = self.broker.notifications.clone();
					let caller = caller.clone();
					self.background(jobs, method, move || {
						notifications.add(&caller, &id, &record);
					});
				}
				Err(err) => self.fail(caller, serial, method, err),
			},
			Call::RemoveNotification { id } => {
				self.bus.send(&caller.connection, ServerMessage::reply(serial, ReplyBody::Empty));
				let notifications = self.broker.notifications.clone();
				let caller = caller.clone();
				self.background(jobs, method, move || {
					notifications.remove(&caller, &id);
				});
			}
			Call::Lookup { uri } => self.blocking(caller, jobs, serial, method, move |broker, caller| {
				let proxies = broker.proxy.lookup(caller, &uri)?;
				Ok(ReplyBody::Proxies { proxies })
			}),
			Call::Close { handle } => self.blocking(caller, jobs, serial, method, move |broker, caller| {
				broker.close_request(caller, &handle)?;
				Ok(ReplyBody::Empty)
			}),
			Call::StartTransfer { options } => self.blocking(caller, jobs, serial, method, move |broker, caller| {
				let key = broker.transfers.start(caller, &options)?;
				Ok(ReplyBody::Key { key })
			}),
			Call::AddFiles { key, fds, .. } => {
				let passed = frame.fds;
				self.blocking(caller, jobs, serial, method, move |broker, caller| {
					let selected = select_descriptors(&fds, &passed)?;
					broker.transfers.add_files(caller, &key, &selected)?;
					Ok(ReplyBody::Empty)
				});
			}
			Call::RetrieveFiles { key, .. } => self.blocking(caller, jobs, serial, method, move |broker, caller| {
				let files = broker.transfers.retrieve_files(caller, &key)?;
				Ok(ReplyBody::Files { files })
			}),
			Call::StopTransfer { key } => self.blocking(caller, jobs, serial, method, move |broker, caller| {
				broker.transfers.stop(caller, &key)?;
				Ok(ReplyBody::Empty)
			}),
		}
	}

	fn invoke<C: Capability>(
		&self,
		caller: &Caller,
		serial: u32,
		capability: Arc<C>,
		handle_token: Option<&str>,
		args: C::Args,
	) {
		let bus = self.bus.clone();
		let connection = caller.connection.clone();
		let started = self
			.broker
			.engine
			.invoke(capability, caller, handle_token, args, |handle| {
				bus.send(
					&connection,
					ServerMessage::reply(
						serial,
						ReplyBody::Handle {
							handle: handle.to_string(),
						},
					),
				);
			});
		if let Err(err) = started {
			self.fail(caller, serial, C::NAME, err);
		}
	}

	/// Runs `job` on the pool without a reply.
	fn background<F>(&self, jobs: &Jobs, method: &'static str, job: F)
	where
		F: FnOnce() + Send + 'static,
	{
		let token = jobs.token();
		let workers = self.broker.engine.workers().clone();
		let runtime = workers.runtime().clone();
		runtime.spawn(async move {
			let _token = token;
			if let Err(err) = workers.run(job).await {
				warn!(target = "portal.daemon", method, error = %err, "background job failed");
			}
		});
	}

	fn blocking<F>(&self, caller: &Caller, jobs: &Jobs, serial: u32, method: &'static str, job: F)
	where
		F: FnOnce(&Broker, &Caller) -> portal_runtime::Result<ReplyBody> + Send + 'static,
	{
		let this = self.clone();
		let caller = caller.clone();
		let token = jobs.token();
		let workers = self.broker.engine.workers().clone();
		let runtime = workers.runtime().clone();
		runtime.spawn(async move {
			let _token = token;
			let outcome = {
				let broker = this.broker.clone();
				let caller = caller.clone();
				workers.run(move || job(&broker, &caller)).await
			};
			match outcome.and_then(|result| result) {
				Ok(body) => {
					this.bus.send(&caller.connection, ServerMessage::reply(serial, body));
				}
				Err(err) => this.fail(&caller, serial, method, err),
			}
		});
	}

	fn fail(&self, caller: &Caller, serial: u32, method: &'static str, err: Error) {
		if err.is_caller_error() {
			debug!(target = "portal.daemon", connection = %caller.connection, method, serial, error = %err, "call rejected");
		} else {
			warn!(target = "portal.daemon", connection = %caller.connection, method, serial, error = %err, "call failed");
		}
		self.bus
			.send(&caller.connection, ServerMessage::error(Some(serial), err.kind(), err.to_string()));
	}
}

/// Decodes a call line. On failure returns the serial, if one could be
/// read, and the reason.
fn parse_call(line: &str) -> Result<CallMessage, (Option<u32>, String)> {
	let value: Value = serde_json::from_str(line).map_err(|e| (None, format!("Malformed call: {e}")))?;
	let serial = value
		.get("serial")
		.and_then(Value::as_u64)
		.and_then(|serial| u32::try_from(serial).ok());
	serde_json::from_value(value).map_err(|e| (serial, format!("Invalid call: {e}")))
}
