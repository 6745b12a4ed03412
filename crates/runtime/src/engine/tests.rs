use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use portal_protocol::ResponseCode;
use serde_json::{Map, Value, json};

use super::*;
use crate::error::Error;
use crate::identity::{AppIdentity, ConnectionId};
use crate::testing::RecordingBus;

/// Echoes a number back; negative input is invalid, zero stays pending.
struct Echo {
	runs: AtomicUsize,
}

impl Capability for Echo {
	type Args = i64;
	type Input = i64;
	type Output = i64;

	const NAME: &'static str = "Echo";

	fn validate(&self, _caller: &Caller, args: i64) -> Result<i64> {
		if args < 0 {
			return Err(Error::InvalidArgument("negative".into()));
		}
		Ok(args)
	}

	fn execute(&self, _request: &mut RequestGuard<'_>, input: i64) -> Completion<i64> {
		self.runs.fetch_add(1, Ordering::SeqCst);
		if input == 0 { Completion::Pending } else { Completion::Done(input) }
	}

	fn build_response(&self, output: i64) -> (ResponseCode, Map<String, Value>) {
		let mut results = Map::new();
		results.insert("value".into(), json!(output));
		(ResponseCode::Success, results)
	}
}

fn setup() -> (Engine, Arc<RecordingBus>, Arc<Echo>, Caller) {
	let bus = RecordingBus::new();
	let engine = Engine::new(RequestRegistry::new(bus.clone()), WorkerPool::new(2).unwrap());
	let echo = Arc::new(Echo {
		runs: AtomicUsize::new(0),
	});
	let caller = Caller::new(
		AppIdentity::sandboxed("org.example.App", Vec::new()),
		ConnectionId::new(":1.9"),
	);
	(engine, bus, echo, caller)
}

async fn wait_for_signals(bus: &RecordingBus, count: usize) {
	for _ in 0..200 {
		if bus.signals().len() >= count {
			return;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
}

#[tokio::test]
async fn done_responds_with_built_results() {
	let (engine, bus, echo, caller) = setup();
	let mut exported = None;
	let request = engine
		.invoke(echo, &caller, Some("e1"), 5, |handle| exported = Some(handle.to_string()))
		.unwrap();

	assert_eq!(exported.as_deref(), Some(request.id()));
	assert!(request.id().ends_with("/1_9/e1"));

	wait_for_signals(&bus, 1).await;
	let signals = bus.signals_for(&caller.connection);
	assert_eq!(signals.len(), 1);
	assert_eq!(signals[0].response_code(), Some(ResponseCode::Success));
	assert_eq!(signals[0].body["results"]["value"], 5);
	assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn validation_error_retires_without_response() {
	let (engine, bus, echo, caller) = setup();
	let mut exported = false;
	let err = engine.invoke(echo.clone(), &caller, None, -1, |_| exported = true).unwrap_err();

	assert!(matches!(err, Error::InvalidArgument(_)));
	assert!(!exported);
	assert!(engine.requests().is_empty());
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(bus.signals().is_empty());
	assert_eq!(echo.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pending_stays_exported_until_closed() {
	let (engine, bus, echo, caller) = setup();
	let request = engine.invoke(echo.clone(), &caller, None, 0, |_| {}).unwrap();

	for _ in 0..200 {
		if echo.runs.load(Ordering::SeqCst) == 1 {
			break;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	// Let the worker release the request lock.
	tokio::time::sleep(Duration::from_millis(20)).await;
	assert!(bus.signals().is_empty());
	assert!(engine.requests().contains(request.id()));

	engine
		.requests()
		.lookup(request.id(), &caller.connection)
		.unwrap()
		.lock()
		.close();
	assert_eq!(bus.responses(request.id()), vec![ResponseCode::Cancelled]);
	assert!(engine.requests().is_empty());
}

#[tokio::test]
async fn closed_before_execution_never_runs() {
	let (engine, bus, echo, caller) = setup();
	engine.workers().close();

	let request = engine.invoke(echo.clone(), &caller, None, 3, |_| {}).unwrap();
	request.lock().close();
	tokio::time::sleep(Duration::from_millis(20)).await;

	assert_eq!(echo.runs.load(Ordering::SeqCst), 0);
	assert_eq!(bus.responses(request.id()), vec![ResponseCode::Cancelled]);
}
