//! Call, reply, and signal envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::interface;
use crate::options::{ActivateActionOptions, RequestOptions, StartTransferOptions, TransferOptions};
use crate::types::{ErrorName, Location, ResponseCode};

/// One method call written by a client, correlated by `serial`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallMessage {
	pub serial: u32,
	#[serde(flatten)]
	pub call: Call,
}

/// Broker methods, tagged by `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Call {
	/// Opens a file transfer session and returns its key.
	StartTransfer {
		#[serde(default)]
		options: StartTransferOptions,
	},
	/// Adds files to a transfer. `fds` index into the descriptors passed
	/// alongside this message.
	AddFiles {
		key: String,
		fds: Vec<u32>,
		#[serde(default)]
		options: TransferOptions,
	},
	/// Retrieves the files of a transfer, re-exported for the caller.
	RetrieveFiles {
		key: String,
		#[serde(default)]
		options: TransferOptions,
	},
	/// Ends a transfer.
	StopTransfer { key: String },
	/// Activates an action of another application after a permission check.
	ActivateAction {
		parent_window: String,
		application_id: String,
		action_id: String,
		#[serde(default)]
		parameters: Vec<Value>,
		#[serde(default)]
		options: ActivateActionOptions,
	},
	/// Starts location tracking scoped to the returned request.
	TrackLocation {
		#[serde(default)]
		parent_window: String,
		#[serde(default)]
		options: RequestOptions,
	},
	/// Shows a notification. The record is validated by the broker.
	AddNotification { id: String, notification: Value },
	/// Withdraws a notification.
	RemoveNotification { id: String },
	/// Looks up proxies for a URI.
	Lookup { uri: String },
	/// Closes a request early.
	Close { handle: String },
}

impl Call {
	/// Method name as it appears on the wire.
	pub fn method(&self) -> &'static str {
		match self {
			Call::StartTransfer { .. } => "StartTransfer",
			Call::AddFiles { .. } => "AddFiles",
			Call::RetrieveFiles { .. } => "RetrieveFiles",
			Call::StopTransfer { .. } => "StopTransfer",
			Call::ActivateAction { .. } => "ActivateAction",
			Call::TrackLocation { .. } => "TrackLocation",
			Call::AddNotification { .. } => "AddNotification",
			Call::RemoveNotification { .. } => "RemoveNotification",
			Call::Lookup { .. } => "Lookup",
			Call::Close { .. } => "Close",
		}
	}
}

/// Body of a successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyBody {
	Key { key: String },
	Files { files: Vec<String> },
	Handle { handle: String },
	Proxies { proxies: Vec<String> },
	Empty,
}

/// Messages written by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	Reply {
		serial: u32,
		body: ReplyBody,
	},
	Error {
		/// Serial of the failed call, absent when the line could not be parsed.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		serial: Option<u32>,
		name: String,
		message: String,
	},
	Signal(Signal),
}

impl ServerMessage {
	pub fn reply(serial: u32, body: ReplyBody) -> Self {
		ServerMessage::Reply { serial, body }
	}

	pub fn error(serial: Option<u32>, name: ErrorName, message: impl Into<String>) -> Self {
		ServerMessage::Error {
			serial,
			name: name.as_str().to_string(),
			message: message.into(),
		}
	}
}

/// A signal addressed to one connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
	pub path: String,
	pub interface: String,
	pub member: String,
	#[serde(default)]
	pub body: Value,
}

impl Signal {
	/// The single `Response` signal that terminates a request.
	pub fn response(path: &str, code: ResponseCode, results: Map<String, Value>) -> Self {
		Self {
			path: path.to_string(),
			interface: interface::REQUEST.to_string(),
			member: "Response".to_string(),
			body: json!({ "response": code, "results": results }),
		}
	}

	/// Interim location event scoped to a tracking request.
	pub fn location_updated(path: &str, location: &Location) -> Self {
		Self {
			path: path.to_string(),
			interface: interface::GEOLOCATION.to_string(),
			member: "LocationUpdated".to_string(),
			body: json!(location),
		}
	}

	/// Notification action routed back to the application that added it.
	pub fn action_invoked(id: &str, action: &str, parameter: &[Value]) -> Self {
		Self {
			path: crate::DESKTOP_OBJECT_PATH.to_string(),
			interface: interface::NOTIFICATION.to_string(),
			member: "ActionInvoked".to_string(),
			body: json!({ "id": id, "action": action, "parameter": parameter }),
		}
	}

	/// Action activation delivered to the target application's connection.
	pub fn activate_action(path: &str, action: &str, parameters: &[Value], platform_data: &Map<String, Value>) -> Self {
		Self {
			path: path.to_string(),
			interface: interface::APPLICATION.to_string(),
			member: "ActivateAction".to_string(),
			body: json!({
				"action": action,
				"parameters": parameters,
				"platform-data": platform_data,
			}),
		}
	}

	/// Response code, when this is a request `Response` signal.
	pub fn response_code(&self) -> Option<ResponseCode> {
		if self.member != "Response" {
			return None;
		}
		serde_json::from_value(self.body.get("response")?.clone()).ok()
	}
}
