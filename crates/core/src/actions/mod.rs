//! Activating actions of other applications.
//!
//! `ActivateAction` asks for permission once per `(caller, application,
//! action)` and then calls `ActivateAction` on the target application's
//! object path through the [`Launcher`].

use std::sync::Arc;

use portal_protocol::ResponseCode;
use portal_runtime::{
	AccessDialog, Caller, Capability, Completion, Error, PermissionKey, Permissions, RequestGuard, Result, YesNoAsk,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::app_id;

#[cfg(test)]
mod tests;

/// Permission table for action activation.
pub const TABLE: &str = "actions";

/// Delivers an action activation to an application.
pub trait Launcher: Send + Sync {
	fn activate_action(
		&self,
		application_id: &str,
		object_path: &str,
		action: &str,
		parameters: &[Value],
		platform_data: &Map<String, Value>,
	) -> Result<()>;
}

/// Arguments of `ActivateAction`.
#[derive(Debug, Clone, Default)]
pub struct ActivateAction {
	pub parent_window: String,
	pub application_id: String,
	pub action_id: String,
	pub parameters: Vec<Value>,
	pub platform_data: Map<String, Value>,
}

pub struct Actions {
	permissions: Permissions,
	launcher: Arc<dyn Launcher>,
}

impl Actions {
	pub fn new(permissions: Permissions, launcher: Arc<dyn Launcher>) -> Self {
		Self { permissions, launcher }
	}

	fn dialog(caller_id: &str, parent_window: &str, application: &str, action: &str) -> AccessDialog {
		let subtitle = if caller_id.is_empty() {
			format!("An application wants to activate {application}")
		} else {
			format!("{caller_id} wants to activate {application}")
		};
		AccessDialog {
			app_id: caller_id.to_string(),
			parent_window: parent_window.to_string(),
			title: format!("Activate the '{action}' action in {application}?"),
			subtitle,
			body: "Access to application actions can be changed from the privacy settings at any time.".to_string(),
			icon: Some("emblem-system-symbolic".to_string()),
			grant_label: None,
			deny_label: None,
		}
	}
}

impl Capability for Actions {
	type Args = ActivateAction;
	type Input = ActivateAction;
	type Output = ResponseCode;

	const NAME: &'static str = "ActivateAction";

	fn validate(&self, _caller: &Caller, args: ActivateAction) -> Result<ActivateAction> {
		if !app_id::is_valid(&args.application_id) {
			return Err(Error::InvalidArgument(format!(
				"Invalid application id: {}",
				args.application_id
			)));
		}
		if args.action_id.is_empty() {
			return Err(Error::InvalidArgument("Action name must not be empty".to_string()));
		}
		Ok(args)
	}

	fn execute(&self, request: &mut RequestGuard<'_>, input: ActivateAction) -> Completion<ResponseCode> {
		let caller_id = request.app().id().to_string();
		let object = format!("{}::{}", input.application_id, input.action_id);
		let dialog = Self::dialog(&caller_id, &input.parent_window, &input.application_id, &input.action_id);
		let key = PermissionKey {
			table: TABLE,
			id: &object,
			app_id: &caller_id,
		};

		match self.permissions.ask_or_recall(request, key, &YesNoAsk, &dialog) {
			Ok(access) if access.is_allowed() => {}
			Ok(_) => {
				debug!(target = "portal.actions", action = %object, app = %caller_id, "action activation denied");
				return Completion::Done(ResponseCode::Cancelled);
			}
			Err(_) => return Completion::Done(ResponseCode::Other),
		}

		let path = app_id::object_path(&input.application_id);
		match self.launcher.activate_action(
			&input.application_id,
			&path,
			&input.action_id,
			&input.parameters,
			&input.platform_data,
		) {
			Ok(()) => Completion::Done(ResponseCode::Success),
			Err(err) => {
				warn!(target = "portal.actions", action = %object, error = %err, "failed to activate action");
				Completion::Done(ResponseCode::Other)
			}
		}
	}

	fn build_response(&self, code: ResponseCode) -> (ResponseCode, Map<String, Value>) {
		(code, Map::new())
	}
}
