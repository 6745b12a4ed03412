//! Closed notification schema.
//!
//! Records arrive as free-form JSON and are parsed into [`NotificationRecord`]
//! before they reach any handler; unknown keys, wrong types, unknown
//! priorities, and malformed icons or buttons are rejected.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A notification as accepted by `AddNotification`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct NotificationRecord {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub body: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<Icon>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub priority: Option<Priority>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_action: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default_action_target: Option<Value>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub buttons: Vec<Button>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	Low,
	Normal,
	High,
	Urgent,
}

/// A button. `label` and `action` must be present; their content is not checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Button {
	pub label: String,
	pub action: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target: Option<Value>,
}

/// An icon: either a bare icon name or a serialized icon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Icon {
	Name(String),
	Serialized(SerializedIcon),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SerializedIcon {
	/// Themed icon names, most specific first.
	Themed(Vec<String>),
	/// Base64-encoded image bytes.
	Bytes(String),
}

/// Why a notification record was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError(pub String);

impl std::fmt::Display for SchemaError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::error::Error for SchemaError {}

impl NotificationRecord {
	/// Parses and validates a raw record.
	pub fn parse(raw: Value) -> Result<Self, SchemaError> {
		if !raw.is_object() {
			return Err(SchemaError("expected an object for notification".to_string()));
		}
		let record: NotificationRecord =
			serde_json::from_value(raw).map_err(|e| SchemaError(e.to_string()))?;
		record.validate()?;
		Ok(record)
	}

	fn validate(&self) -> Result<(), SchemaError> {
		if let Some(icon) = &self.icon {
			icon.validate()?;
		}
		Ok(())
	}
}

impl Icon {
	fn validate(&self) -> Result<(), SchemaError> {
		let valid = match self {
			Icon::Name(name) => !name.is_empty(),
			Icon::Serialized(SerializedIcon::Themed(names)) => {
				!names.is_empty() && names.iter().all(|n| !n.is_empty())
			}
			Icon::Serialized(SerializedIcon::Bytes(data)) => STANDARD.decode(data).is_ok_and(|b| !b.is_empty()),
		};
		if valid { Ok(()) } else { Err(SchemaError("invalid icon".to_string())) }
	}
}
