//! Wire types for the portal broker protocol.
//!
//! Messages are newline-delimited JSON over a Unix stream socket. A client
//! writes [`CallMessage`]s; the broker answers each with exactly one
//! [`ServerMessage::Reply`] or [`ServerMessage::Error`] carrying the same
//! serial, and pushes [`Signal`]s for request responses and interim events.
//!
//! # Main Types
//!
//! - [`Call`] - one method invocation, tagged by `method`
//! - [`ServerMessage`] - replies, errors, and signals from the broker
//! - [`ResponseCode`] - the code carried by every request `Response` signal
//! - [`NotificationRecord`] - closed notification schema, validated at the boundary

pub mod message;
pub mod notification;
pub mod options;
pub mod types;

pub use message::{Call, CallMessage, ReplyBody, ServerMessage, Signal};
pub use notification::{Button, Icon, NotificationRecord, Priority, SchemaError, SerializedIcon};
pub use options::{ActivateActionOptions, RequestOptions, StartTransferOptions, TransferOptions};
pub use types::{ErrorName, Location, ResponseCode};

/// Well-known object path of the broker's main object.
pub const DESKTOP_OBJECT_PATH: &str = "/org/freedesktop/portal/desktop";

/// Prefix under which request objects are exported.
pub const REQUEST_PATH_PREFIX: &str = "/org/freedesktop/portal/desktop/request";

/// Interface names used in signals.
pub mod interface {
	pub const REQUEST: &str = "org.freedesktop.portal.Request";
	pub const GEOLOCATION: &str = "org.freedesktop.portal.Geolocation";
	pub const NOTIFICATION: &str = "org.freedesktop.portal.Notification";
	pub const APPLICATION: &str = "org.freedesktop.Application";
}
