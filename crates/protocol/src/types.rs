//! Shared scalar types: response codes, error names, locations.

use serde::{Deserialize, Serialize};

/// Code carried by a request's single `Response` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum ResponseCode {
	/// The interaction completed.
	Success,
	/// The user or the caller cancelled the interaction.
	Cancelled,
	/// The interaction ended some other way (backend failure, error).
	Other,
}

impl ResponseCode {
	pub fn as_u32(self) -> u32 {
		match self {
			ResponseCode::Success => 0,
			ResponseCode::Cancelled => 1,
			ResponseCode::Other => 2,
		}
	}
}

impl From<ResponseCode> for u32 {
	fn from(code: ResponseCode) -> Self {
		code.as_u32()
	}
}

impl TryFrom<u32> for ResponseCode {
	type Error = String;

	fn try_from(value: u32) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(ResponseCode::Success),
			1 => Ok(ResponseCode::Cancelled),
			2 => Ok(ResponseCode::Other),
			other => Err(format!("invalid response code: {other}")),
		}
	}
}

impl std::fmt::Display for ResponseCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			ResponseCode::Success => write!(f, "success"),
			ResponseCode::Cancelled => write!(f, "cancelled"),
			ResponseCode::Other => write!(f, "other"),
		}
	}
}

/// Error names returned synchronously to the immediate caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorName {
	AccessDenied,
	NotAllowed,
	InvalidArgument,
	Failed,
}

impl ErrorName {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorName::AccessDenied => "org.freedesktop.DBus.Error.AccessDenied",
			ErrorName::NotAllowed => "org.freedesktop.portal.Error.NotAllowed",
			ErrorName::InvalidArgument => "org.freedesktop.portal.Error.InvalidArgument",
			ErrorName::Failed => "org.freedesktop.portal.Error.Failed",
		}
	}

	pub fn parse(name: &str) -> Option<Self> {
		[
			ErrorName::AccessDenied,
			ErrorName::NotAllowed,
			ErrorName::InvalidArgument,
			ErrorName::Failed,
		]
		.into_iter()
		.find(|candidate| candidate.as_str() == name)
	}
}

impl std::fmt::Display for ErrorName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A position fix delivered through `LocationUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
	pub latitude: f64,
	pub longitude: f64,
	#[serde(default)]
	pub altitude: f64,
	#[serde(default)]
	pub accuracy: f64,
	#[serde(default)]
	pub speed: f64,
	#[serde(default)]
	pub heading: f64,
	#[serde(default)]
	pub description: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_code_serializes_as_number() {
		assert_eq!(serde_json::to_string(&ResponseCode::Cancelled).unwrap(), "1");
		let code: ResponseCode = serde_json::from_str("2").unwrap();
		assert_eq!(code, ResponseCode::Other);
		assert!(serde_json::from_str::<ResponseCode>("7").is_err());
	}

	#[test]
	fn error_names_round_trip_through_parse() {
		let name = ErrorName::parse("org.freedesktop.DBus.Error.AccessDenied");
		assert_eq!(name, Some(ErrorName::AccessDenied));
		assert_eq!(ErrorName::parse("org.example.Nope"), None);
	}
}
