//! Application identity from Unix peer credentials.
//!
//! A connecting process is sandboxed when its root filesystem carries a
//! `.flatpak-info` key file; the `[Application] name` key is its app id and
//! `[Context] shared` lists the host subsystems it may use. Without that
//! file the peer is trusted host software.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;

use portal_runtime::{AppIdentity, Error, IdentityResolver, PeerCredentials, Result};
use tracing::debug;

/// Resolves identities through `/proc/<pid>/root/.flatpak-info`.
#[derive(Debug, Clone)]
pub struct ProcIdentityResolver {
	proc_root: PathBuf,
}

impl ProcIdentityResolver {
	pub fn new() -> Self {
		Self::with_proc_root("/proc")
	}

	/// Resolver reading process roots under `proc_root` instead of `/proc`.
	pub fn with_proc_root(proc_root: impl Into<PathBuf>) -> Self {
		Self {
			proc_root: proc_root.into(),
		}
	}
}

impl Default for ProcIdentityResolver {
	fn default() -> Self {
		Self::new()
	}
}

impl IdentityResolver for ProcIdentityResolver {
	fn resolve(&self, peer: &PeerCredentials) -> Result<AppIdentity> {
		let Some(pid) = peer.pid else {
			return Err(Error::AccessDenied("Unable to identify the calling process".to_string()));
		};
		let info = self.proc_root.join(pid.to_string()).join("root").join(".flatpak-info");
		let content = match fs::read_to_string(&info) {
			Ok(content) => content,
			Err(err) if err.kind() == io::ErrorKind::NotFound => {
				debug!(target = "portal.identity", pid, uid = peer.uid, "no sandbox metadata; host peer");
				return Ok(AppIdentity::host());
			}
			Err(err) => return Err(Error::AccessDenied(format!("Unable to read sandbox metadata: {err}"))),
		};

		let sections = parse_key_file(&content);
		let id = sections
			.get("Application")
			.and_then(|keys| keys.get("name"))
			.filter(|name| !name.is_empty())
			.ok_or_else(|| Error::AccessDenied("Sandbox metadata has no application name".to_string()))?;
		let shared = sections
			.get("Context")
			.and_then(|keys| keys.get("shared"))
			.map(|list| split_list(list))
			.unwrap_or_default();

		debug!(target = "portal.identity", pid, app = %id, ?shared, "sandboxed peer");
		Ok(AppIdentity::sandboxed(id.as_str(), shared))
	}
}

/// Parses the `[Group]` / `key=value` format of `.flatpak-info`.
fn parse_key_file(content: &str) -> HashMap<String, HashMap<String, String>> {
	let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
	let mut current: Option<String> = None;
	for line in content.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
			current = Some(name.to_string());
			sections.entry(name.to_string()).or_default();
			continue;
		}
		let (Some(section), Some((key, value))) = (&current, line.split_once('=')) else {
			continue;
		};
		sections
			.entry(section.clone())
			.or_default()
			.insert(key.trim().to_string(), value.trim().to_string());
	}
	sections
}

fn split_list(value: &str) -> Vec<String> {
	value
		.split(';')
		.map(str::trim)
		.filter(|item| !item.is_empty())
		.map(str::to_string)
		.collect()
}
