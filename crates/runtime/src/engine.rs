//! One invocation pipeline for every request-based capability.
//!
//! [`Engine::invoke`] creates the request, validates the caller's input
//! under the request lock, exports the request and hands the body to the
//! worker pool. A [`Capability`] supplies the three steps that differ.

use std::sync::Arc;

use portal_protocol::ResponseCode;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::Caller;
use crate::request::{Request, RequestGuard, RequestRegistry};
use crate::worker::WorkerPool;

#[cfg(test)]
mod tests;

/// How a capability body finished.
#[derive(Debug)]
pub enum Completion<T> {
	/// Respond now with the given output.
	Done(T),
	/// Leave the request exported for interim events. It ends when the
	/// caller closes it or disconnects.
	Pending,
}

/// A request-based broker method.
pub trait Capability: Send + Sync + 'static {
	/// Arguments as decoded from the call.
	type Args;
	/// Validated input handed to [`Capability::execute`].
	type Input: Send + 'static;
	type Output;

	/// Method name used in logs.
	const NAME: &'static str;

	/// Checks the caller's arguments. Errors are returned to the caller
	/// synchronously and the request is retired without a response.
	fn validate(&self, caller: &Caller, args: Self::Args) -> Result<Self::Input>;

	/// Runs the body on a worker thread with the request lock held.
	fn execute(&self, request: &mut RequestGuard<'_>, input: Self::Input) -> Completion<Self::Output>;

	/// Maps the body's output to the response code and results.
	fn build_response(&self, output: Self::Output) -> (ResponseCode, Map<String, Value>);
}

/// Request registry plus the worker pool that runs capability bodies.
#[derive(Clone)]
pub struct Engine {
	requests: RequestRegistry,
	workers: WorkerPool,
}

impl Engine {
	pub fn new(requests: RequestRegistry, workers: WorkerPool) -> Self {
		Self { requests, workers }
	}

	pub fn requests(&self) -> &RequestRegistry {
		&self.requests
	}

	pub fn workers(&self) -> &WorkerPool {
		&self.workers
	}

	/// Starts `capability` for `caller`.
	///
	/// `on_exported` runs with the request handle after export and before
	/// the body is scheduled, so a reply queued there precedes any signal
	/// the request emits.
	///
	/// # Errors
	///
	/// Validation errors from the capability. The request is retired.
	pub fn invoke<C: Capability>(
		&self,
		capability: Arc<C>,
		caller: &Caller,
		handle_token: Option<&str>,
		args: C::Args,
		on_exported: impl FnOnce(&str),
	) -> Result<Arc<Request>> {
		let request = self
			.requests
			.create(caller.app.clone(), caller.connection.clone(), handle_token);

		let input = {
			let mut guard = request.lock();
			let input = match capability.validate(caller, args) {
				Ok(input) => input,
				Err(err) => {
					debug!(target = "portal.request", method = C::NAME, request = %request.id(), error = %err, "invalid call");
					guard.close();
					return Err(err);
				}
			};
			if let Err(err) = guard.export() {
				guard.close();
				return Err(err);
			}
			on_exported(request.id());
			input
		};

		let job_request = request.clone();
		let job = move || {
			let mut guard = job_request.lock();
			if !guard.is_exported() {
				debug!(target = "portal.request", method = C::NAME, request = %guard.id(), "request closed before it ran");
				return;
			}
			match capability.execute(&mut guard, input) {
				Completion::Done(output) => {
					let (code, results) = capability.build_response(output);
					guard.respond(code, results);
				}
				Completion::Pending => {
					debug!(target = "portal.request", method = C::NAME, request = %guard.id(), "request left open");
				}
			}
		};

		let workers = self.workers.clone();
		let fallback = request.clone();
		self.workers.runtime().spawn(async move {
			if let Err(err) = workers.run(job).await {
				warn!(target = "portal.request", method = C::NAME, request = %fallback.id(), error = %err, "handler failed");
				fallback.lock().respond(ResponseCode::Other, Map::new());
			}
		});

		Ok(request)
	}
}
