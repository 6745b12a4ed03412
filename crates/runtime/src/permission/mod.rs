//! Persisted per-application permissions and the ask-or-recall helper.
//!
//! Decisions live in a [`PermissionStore`] keyed by `(table, id, app)` as a
//! list of string tokens. A [`PermissionSchema`] decodes and encodes those
//! tokens; anything a schema does not recognise is treated as unset.
//!
//! # Main Types
//!
//! - [`Permissions`] - store plus access-dialog backend, drives [`Permissions::ask_or_recall`]
//! - [`YesNoAsk`] - single `yes` / `no` / `ask` token
//! - [`GeolocationSchema`] - `[accuracy, timestamp]` pair

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use portal_protocol::ResponseCode;
use tracing::{debug, warn};

use crate::bus::BackendHandle;
use crate::error::Result;
use crate::request::RequestGuard;

#[cfg(test)]
mod tests;

/// Per-app token lists stored under one `(table, id)` pair.
pub type PermissionEntry = BTreeMap<String, Vec<String>>;

/// Storage for permission decisions.
pub trait PermissionStore: Send + Sync {
	/// Returns every app's tokens for `(table, id)`. A missing entry is empty.
	fn lookup(&self, table: &str, id: &str) -> Result<PermissionEntry>;

	/// Replaces `app_id`'s tokens for `(table, id)`.
	fn set(&self, table: &str, id: &str, app_id: &str, tokens: Vec<String>) -> Result<()>;
}

/// A stored decision as read through a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Unset,
	Allow,
	Deny,
	Ask,
}

/// Outcome of an ask-or-recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
	Allow,
	Deny,
}

impl Access {
	pub fn is_allowed(self) -> bool {
		self == Access::Allow
	}
}

/// Encoding of a decision as stored tokens.
pub trait PermissionSchema: Send + Sync {
	fn decode(&self, tokens: &[String]) -> Decision;
	fn encode(&self, access: Access) -> Vec<String>;
}

/// One of `yes`, `no` or `ask`.
#[derive(Debug, Clone, Copy, Default)]
pub struct YesNoAsk;

impl PermissionSchema for YesNoAsk {
	fn decode(&self, tokens: &[String]) -> Decision {
		match tokens {
			[] => Decision::Unset,
			[token] => match token.as_str() {
				"yes" => Decision::Allow,
				"no" => Decision::Deny,
				"ask" => Decision::Ask,
				other => {
					warn!(target = "portal.permission", token = other, "unknown permission token");
					Decision::Unset
				}
			},
			_ => {
				warn!(target = "portal.permission", ?tokens, "wrong permission format, ignoring");
				Decision::Unset
			}
		}
	}

	fn encode(&self, access: Access) -> Vec<String> {
		let token = match access {
			Access::Allow => "yes",
			Access::Deny => "no",
		};
		vec![token.to_string()]
	}
}

/// Accuracy level followed by the unix time of the decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeolocationSchema;

impl GeolocationSchema {
	const ACCURACIES: [&'static str; 5] = ["EXACT", "STREET", "NEIGHBORHOOD", "CITY", "COUNTRY"];
}

impl PermissionSchema for GeolocationSchema {
	fn decode(&self, tokens: &[String]) -> Decision {
		if tokens.is_empty() {
			return Decision::Unset;
		}
		if tokens.len() < 2 {
			warn!(target = "portal.permission", ?tokens, "wrong geolocation permission format, ignoring");
			return Decision::Unset;
		}
		match tokens[0].as_str() {
			"NONE" => Decision::Deny,
			accuracy if Self::ACCURACIES.contains(&accuracy) => Decision::Allow,
			other => {
				warn!(target = "portal.permission", accuracy = other, "unknown geolocation accuracy");
				Decision::Unset
			}
		}
	}

	fn encode(&self, access: Access) -> Vec<String> {
		let accuracy = match access {
			Access::Allow => "EXACT",
			Access::Deny => "NONE",
		};
		let now = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or(0);
		vec![accuracy.to_string(), now.to_string()]
	}
}

/// Text and labels of an access dialog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccessDialog {
	pub app_id: String,
	pub parent_window: String,
	pub title: String,
	pub subtitle: String,
	pub body: String,
	pub icon: Option<String>,
	pub grant_label: Option<String>,
	pub deny_label: Option<String>,
}

/// Backend that asks the user.
pub trait AccessBackend: Send + Sync {
	/// Shows a dialog and blocks until the user answers. `handle` is the
	/// path of the request the dialog belongs to.
	fn access_dialog(&self, handle: &str, dialog: &AccessDialog) -> Result<ResponseCode>;

	/// Dismisses the dialog shown for `handle`, if any.
	fn cancel(&self, _handle: &str) {}
}

struct DialogHandle {
	backend: Arc<dyn AccessBackend>,
	handle: String,
}

impl BackendHandle for DialogHandle {
	fn close(&self) {
		self.backend.cancel(&self.handle);
	}
}

/// Where a decision is stored.
#[derive(Debug, Clone, Copy)]
pub struct PermissionKey<'a> {
	pub table: &'a str,
	pub id: &'a str,
	pub app_id: &'a str,
}

/// Permission store plus the dialog backend consulted when no decision is stored.
#[derive(Clone)]
pub struct Permissions {
	store: Arc<dyn PermissionStore>,
	access: Arc<dyn AccessBackend>,
}

impl Permissions {
	pub fn new(store: Arc<dyn PermissionStore>, access: Arc<dyn AccessBackend>) -> Self {
		Self { store, access }
	}

	pub fn store(&self) -> &Arc<dyn PermissionStore> {
		&self.store
	}

	/// Reads the stored decision. Store failures read as unset.
	pub fn recall(&self, key: PermissionKey<'_>, schema: &dyn PermissionSchema) -> Decision {
		match self.store.lookup(key.table, key.id) {
			Ok(entry) => entry
				.get(key.app_id)
				.map(|tokens| schema.decode(tokens))
				.unwrap_or(Decision::Unset),
			Err(err) => {
				warn!(
					target = "portal.permission",
					table = key.table,
					id = key.id,
					error = %err,
					"permission lookup failed"
				);
				Decision::Unset
			}
		}
	}

	/// Uses a stored allow/deny directly; otherwise asks through the dialog
	/// backend on behalf of `request` and, if nothing was stored before,
	/// persists the answer.
	///
	/// The dialog backend is registered as the request's delegate while the
	/// dialog is up, so a close dismisses it. A cancelled request denies and
	/// persists nothing.
	///
	/// # Errors
	///
	/// [`Error::Backend`](crate::Error::Backend) when the dialog itself fails.
	/// Nothing is persisted.
	pub fn ask_or_recall(
		&self,
		request: &mut RequestGuard<'_>,
		key: PermissionKey<'_>,
		schema: &dyn PermissionSchema,
		dialog: &AccessDialog,
	) -> Result<Access> {
		let decision = self.recall(key, schema);
		match decision {
			Decision::Allow => return Ok(Access::Allow),
			Decision::Deny => return Ok(Access::Deny),
			Decision::Unset | Decision::Ask => {}
		}

		let attached = request.set_delegate(Some(Box::new(DialogHandle {
			backend: self.access.clone(),
			handle: request.id().to_string(),
		})));
		if !attached {
			debug!(target = "portal.permission", request = %request.id(), "request cancelled before the dialog");
			return Ok(Access::Deny);
		}
		let reply = self.access.access_dialog(request.id(), dialog);
		request.set_delegate(None);

		if request.is_cancelled() {
			debug!(target = "portal.permission", request = %request.id(), "access dialog dismissed by close");
			return Ok(Access::Deny);
		}
		let access = match reply {
			Ok(ResponseCode::Success) => Access::Allow,
			Ok(code) => {
				debug!(target = "portal.permission", request = %request.id(), %code, "access dialog declined");
				Access::Deny
			}
			Err(err) => {
				warn!(target = "portal.permission", request = %request.id(), error = %err, "access dialog failed");
				return Err(err);
			}
		};

		if decision == Decision::Unset {
			if let Err(err) = self.store.set(key.table, key.id, key.app_id, schema.encode(access)) {
				warn!(
					target = "portal.permission",
					table = key.table,
					id = key.id,
					app = key.app_id,
					error = %err,
					"storing permission failed"
				);
			}
		}
		Ok(access)
	}
}
