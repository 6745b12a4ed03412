//! Built-in backends used by `portal serve`.
//!
//! None of them talk to a desktop: dialogs answer from configuration,
//! notifications are logged, the location is a configured fix, and
//! documents are tracked in memory under the configured mount point.

use std::collections::HashMap;
use std::ffi::CString;
use std::fs;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use portal::{
	AddFlags, Backends, DescriptorResolver, DocumentPermissions, DocumentStore, Launcher, LocationSource,
	NotificationBackend, ProxyLookup, ResolvedPath,
};
use portal_protocol::{Location, NotificationRecord, ResponseCode, Signal};
use portal_runtime::{AccessBackend, AccessDialog, AppIdentity, Bus, Error, PermissionStore, Result};
use serde_json::{Map, Value};
use tracing::{debug, info};
use url::Url;

use crate::config::{DialogDefault, Settings};
use crate::daemon::ConnectionBus;

/// Wires the built-in backends for `settings`.
pub fn default_backends(settings: &Settings, bus: Arc<ConnectionBus>, store: Arc<dyn PermissionStore>) -> Backends {
	Backends {
		permission_store: store,
		access: Arc::new(ConfigAccess::new(settings.dialog_default)),
		launcher: Arc::new(BusLauncher::new(bus)),
		location: Arc::new(StaticLocation::new(settings.location.clone())),
		notifications: Arc::new(LoggingNotifications),
		proxy: Arc::new(EnvProxyLookup::from_env(settings.proxy.clone())),
		descriptors: Arc::new(ProcDescriptorResolver::new()),
		documents: Arc::new(MemoryDocuments::new(settings.document_mount.clone())),
	}
}

/// Access dialog that always gives the configured answer.
#[derive(Debug, Clone, Copy)]
pub struct ConfigAccess {
	answer: DialogDefault,
}

impl ConfigAccess {
	pub fn new(answer: DialogDefault) -> Self {
		Self { answer }
	}
}

impl AccessBackend for ConfigAccess {
	fn access_dialog(&self, handle: &str, dialog: &AccessDialog) -> Result<ResponseCode> {
		info!(
			target = "portal.access",
			handle,
			app = %dialog.app_id,
			title = %dialog.title,
			answer = ?self.answer,
			"access dialog answered from configuration"
		);
		Ok(match self.answer {
			DialogDefault::Allow => ResponseCode::Success,
			DialogDefault::Deny => ResponseCode::Cancelled,
		})
	}
}

/// Delivers activations to a connected client running as the target app.
pub struct BusLauncher {
	bus: Arc<ConnectionBus>,
}

impl BusLauncher {
	pub fn new(bus: Arc<ConnectionBus>) -> Self {
		Self { bus }
	}
}

impl Launcher for BusLauncher {
	fn activate_action(
		&self,
		application_id: &str,
		object_path: &str,
		action: &str,
		parameters: &[Value],
		platform_data: &Map<String, Value>,
	) -> Result<()> {
		let signal = Signal::activate_action(object_path, action, parameters, platform_data);
		let delivered = self
			.bus
			.connections_of(application_id)
			.into_iter()
			.any(|connection| self.bus.emit(&connection, signal.clone()));
		if delivered {
			Ok(())
		} else {
			Err(Error::backend(format!("{application_id} is not running")))
		}
	}
}

/// Location source reporting a fixed position, if one is configured.
#[derive(Debug, Clone)]
pub struct StaticLocation {
	fix: Option<Location>,
}

impl StaticLocation {
	pub fn new(fix: Option<Location>) -> Self {
		Self { fix }
	}
}

impl LocationSource for StaticLocation {
	fn current(&self) -> Option<Location> {
		self.fix.clone()
	}
}

/// Notification backend that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifications;

impl NotificationBackend for LoggingNotifications {
	fn add_notification(&self, app_id: &str, id: &str, record: &NotificationRecord) -> Result<()> {
		info!(
			target = "portal.notification",
			app = app_id,
			id,
			title = record.title.as_deref().unwrap_or_default(),
			body = record.body.as_deref().unwrap_or_default(),
			buttons = record.buttons.len(),
			"notification"
		);
		Ok(())
	}

	fn remove_notification(&self, app_id: &str, id: &str) -> Result<()> {
		info!(target = "portal.notification", app = app_id, id, "notification withdrawn");
		Ok(())
	}
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Proxy lookup following the `*_proxy` / `no_proxy` environment convention.
pub struct EnvProxyLookup {
	fixed: Option<String>,
	env: EnvLookup,
}

impl EnvProxyLookup {
	/// Reads the process environment. `fixed` overrides it for every URI.
	pub fn from_env(fixed: Option<String>) -> Self {
		Self {
			fixed,
			env: Box::new(|name| std::env::var(name).ok()),
		}
	}

	/// Reads variables from `vars` instead of the environment.
	pub fn with_vars(fixed: Option<String>, vars: HashMap<String, String>) -> Self {
		Self {
			fixed,
			env: Box::new(move |name| vars.get(name).cloned()),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.env)(name)
			.or_else(|| (self.env)(&name.to_ascii_uppercase()))
			.filter(|value| !value.trim().is_empty())
	}

	fn bypassed(&self, host: &str) -> bool {
		let Some(no_proxy) = self.var("no_proxy") else {
			return false;
		};
		no_proxy.split(',').map(str::trim).any(|entry| {
			if entry == "*" {
				return true;
			}
			let entry = entry.trim_start_matches('.');
			!entry.is_empty() && (host == entry || host.ends_with(&format!(".{entry}")))
		})
	}
}

impl ProxyLookup for EnvProxyLookup {
	fn lookup(&self, uri: &str) -> Result<Vec<String>> {
		let url = Url::parse(uri).map_err(|e| Error::InvalidArgument(format!("Invalid URI {uri}: {e}")))?;
		if let Some(proxy) = &self.fixed {
			return Ok(vec![proxy.clone()]);
		}
		if url.host_str().is_some_and(|host| self.bypassed(host)) {
			return Ok(vec!["direct://".to_string()]);
		}
		let proxy = self
			.var(&format!("{}_proxy", url.scheme()))
			.or_else(|| self.var("all_proxy"));
		debug!(target = "portal.proxy", uri, ?proxy, "proxy lookup");
		Ok(vec![proxy.unwrap_or_else(|| "direct://".to_string())])
	}
}

/// Resolves descriptors through `/proc/self/fd`.
#[derive(Debug, Clone)]
pub struct ProcDescriptorResolver {
	fd_dir: PathBuf,
}

impl ProcDescriptorResolver {
	pub fn new() -> Self {
		Self {
			fd_dir: PathBuf::from("/proc/self/fd"),
		}
	}
}

impl Default for ProcDescriptorResolver {
	fn default() -> Self {
		Self::new()
	}
}

impl DescriptorResolver for ProcDescriptorResolver {
	fn resolve(&self, app: &AppIdentity, fd: BorrowedFd<'_>) -> Option<ResolvedPath> {
		let raw = fd.as_raw_fd();
		let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
		if flags < 0 {
			return None;
		}

		let path = fs::read_link(self.fd_dir.join(raw.to_string())).ok()?;
		// pipes and sockets read back as `pipe:[..]`, `socket:[..]`
		if !path.is_absolute() || path.as_os_str().as_bytes().ends_with(b" (deleted)") {
			debug!(target = "portal.fd", %app, fd = raw, path = %path.display(), "descriptor does not name a file");
			return None;
		}

		let mut stat: libc::stat = unsafe { std::mem::zeroed() };
		if unsafe { libc::fstat(raw, &mut stat) } < 0 {
			return None;
		}
		let meta = fs::metadata(&path).ok()?;
		if meta.dev() != stat.st_dev as u64 || meta.ino() != stat.st_ino as u64 {
			debug!(target = "portal.fd", %app, fd = raw, path = %path.display(), "path no longer names the descriptor's file");
			return None;
		}

		let writable = if flags & libc::O_PATH != 0 {
			is_writable_path(&path)
		} else {
			matches!(flags & libc::O_ACCMODE, libc::O_WRONLY | libc::O_RDWR)
		};
		Some(ResolvedPath { path, writable })
	}
}

fn is_writable_path(path: &Path) -> bool {
	CString::new(path.as_os_str().as_bytes())
		.is_ok_and(|c_path| unsafe { libc::access(c_path.as_ptr(), libc::W_OK) } == 0)
}

#[derive(Debug, Clone)]
struct Document {
	path: PathBuf,
	grants: HashMap<String, DocumentPermissions>,
}

/// Document store that only remembers which app was granted which file.
pub struct MemoryDocuments {
	mount: PathBuf,
	next_id: AtomicU64,
	documents: Mutex<HashMap<String, Document>>,
}

impl MemoryDocuments {
	pub fn new(mount: impl Into<PathBuf>) -> Self {
		Self {
			mount: mount.into(),
			next_id: AtomicU64::new(1),
			documents: Mutex::new(HashMap::new()),
		}
	}

	/// Path and grant of `app_id` on document `id`.
	pub fn grant(&self, id: &str, app_id: &str) -> Option<(PathBuf, DocumentPermissions)> {
		let documents = self.documents.lock();
		let doc = documents.get(id)?;
		doc.grants.get(app_id).map(|perms| (doc.path.clone(), *perms))
	}

	pub fn len(&self) -> usize {
		self.documents.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl DocumentStore for MemoryDocuments {
	fn mount_point(&self) -> &Path {
		&self.mount
	}

	fn add_full(
		&self,
		paths: &[PathBuf],
		flags: AddFlags,
		owner: &AppIdentity,
		target_app_id: &str,
		permissions: DocumentPermissions,
	) -> Result<Vec<String>> {
		// The host sees every path already.
		if flags.as_needed_by_app && target_app_id.is_empty() {
			return Ok(vec![String::new(); paths.len()]);
		}

		let mut documents = self.documents.lock();
		let mut ids = Vec::with_capacity(paths.len());
		for path in paths {
			let existing = flags
				.reuse_existing
				.then(|| documents.iter().find(|(_, doc)| &doc.path == path).map(|(id, _)| id.clone()))
				.flatten();
			let id = existing.unwrap_or_else(|| format!("{:08x}", self.next_id.fetch_add(1, Ordering::Relaxed)));
			let doc = documents.entry(id.clone()).or_insert_with(|| Document {
				path: path.clone(),
				grants: HashMap::new(),
			});
			let grant = doc.grants.entry(target_app_id.to_string()).or_default();
			grant.read |= permissions.read;
			grant.write |= permissions.write;
			ids.push(id);
		}
		debug!(target = "portal.documents", owner = %owner, target = target_app_id, count = ids.len(), "documents registered");
		Ok(ids)
	}
}
