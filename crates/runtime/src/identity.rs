//! Caller identities.
//!
//! Every call carries the [`ConnectionId`] it arrived on and the
//! [`AppIdentity`] resolved for that connection. Both are cheap to clone.

use std::fmt;
use std::sync::Arc;

/// Name of one client connection, unique for the lifetime of the broker.
///
/// Connection names look like bus unique names (`:1.42`) so request paths
/// can be derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
	pub fn new(name: impl Into<Arc<str>>) -> Self {
		Self(name.into())
	}

	/// Connection name for the `n`th accepted client.
	pub fn numbered(n: u64) -> Self {
		Self(Arc::from(format!(":1.{n}")))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Path element used for request objects: leading `:` dropped, `.` replaced by `_`.
	pub fn path_element(&self) -> String {
		self.0.strip_prefix(':').unwrap_or(&self.0).replace('.', "_")
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Sandbox-derived identity of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppIdentity {
	id: Arc<str>,
	kind: AppKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AppKind {
	Host,
	Sandboxed { shared: Arc<[String]> },
}

impl AppIdentity {
	/// An unconfined process on the host. Its app id is empty.
	pub fn host() -> Self {
		Self {
			id: Arc::from(""),
			kind: AppKind::Host,
		}
	}

	/// A sandboxed application and the subsystems its sandbox shares with the host.
	pub fn sandboxed(id: impl Into<Arc<str>>, shared: impl IntoIterator<Item = String>) -> Self {
		Self {
			id: id.into(),
			kind: AppKind::Sandboxed {
				shared: shared.into_iter().collect(),
			},
		}
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn is_host(&self) -> bool {
		matches!(self.kind, AppKind::Host)
	}

	/// Returns true if the sandbox shares `subsystem` (e.g. `network`). Always
	/// true for the host.
	pub fn shares(&self, subsystem: &str) -> bool {
		match &self.kind {
			AppKind::Host => true,
			AppKind::Sandboxed { shared } => shared.iter().any(|s| s == subsystem),
		}
	}
}

impl fmt::Display for AppIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.kind {
			AppKind::Host => f.write_str("<host>"),
			AppKind::Sandboxed { .. } => f.write_str(&self.id),
		}
	}
}

/// Who made a call: the resolved app and the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Caller {
	pub app: AppIdentity,
	pub connection: ConnectionId,
}

impl Caller {
	pub fn new(app: AppIdentity, connection: ConnectionId) -> Self {
		Self { app, connection }
	}
}

/// Credentials of a connected peer, as read from the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
	pub pid: Option<i32>,
	pub uid: u32,
}

/// Maps a connected peer to its application identity.
pub trait IdentityResolver: Send + Sync {
	fn resolve(&self, peer: &PeerCredentials) -> crate::Result<AppIdentity>;
}
