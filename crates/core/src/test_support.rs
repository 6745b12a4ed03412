//! Shared helpers for handler tests.

use std::time::Duration;

use portal_protocol::ResponseCode;
use portal_runtime::testing::RecordingBus;

/// Waits until `path` has emitted a response and returns its code.
pub async fn response(bus: &RecordingBus, path: &str) -> Option<ResponseCode> {
	for _ in 0..400 {
		if let Some(code) = bus.responses(path).first() {
			return Some(*code);
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	None
}

/// Waits until `path` has emitted `count` signals of any kind.
pub async fn signals(bus: &RecordingBus, path: &str, count: usize) -> Vec<String> {
	for _ in 0..400 {
		let members = bus.members(path);
		if members.len() >= count {
			return members;
		}
		tokio::time::sleep(Duration::from_millis(5)).await;
	}
	bus.members(path)
}
