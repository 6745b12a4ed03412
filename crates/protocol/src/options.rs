//! Per-method option dictionaries.
//!
//! Unknown keys are ignored, matching how the broker filters option
//! dictionaries down to the keys a method understands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Options common to every method that returns a request handle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
	/// Caller-chosen token used as the last element of the request path.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub handle_token: Option<String>,
}

/// Options for `StartTransfer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartTransferOptions {
	/// Whether receivers may write to the shared files. Defaults to false.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub writable: Option<bool>,
	/// Whether the transfer ends after the first retrieval. Defaults to true.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub autostop: Option<bool>,
}

impl StartTransferOptions {
	pub fn writable(&self) -> bool {
		self.writable.unwrap_or(false)
	}

	pub fn autostop(&self) -> bool {
		self.autostop.unwrap_or(true)
	}
}

/// Options for `AddFiles` and `RetrieveFiles`; currently carries nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferOptions {}

/// Options for `ActivateAction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivateActionOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub handle_token: Option<String>,
	/// Platform data forwarded verbatim to the activated application.
	#[serde(default, rename = "platform-data", skip_serializing_if = "Option::is_none")]
	pub platform_data: Option<Map<String, Value>>,
}
