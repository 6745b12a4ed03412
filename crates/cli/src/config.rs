//! Daemon configuration: [`PortalConfig`] on disk, [`Settings`] resolved.
//!
//! The config file lives at `$XDG_CONFIG_HOME/portal/config.json` unless
//! `--config` names another one. Every key is optional; [`Settings::resolve`]
//! fills the gaps with defaults and applies command line overrides last.

use std::fs;
use std::path::{Path, PathBuf};

use portal_protocol::Location;
use portal_runtime::DEFAULT_WORKERS;
use serde::{Deserialize, Serialize};

use crate::daemon;
use crate::error::{CliError, Result};

/// Schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Answer given by the built-in access dialog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DialogDefault {
	Allow,
	#[default]
	Deny,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
	#[serde(default)]
	pub schema: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub socket_path: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub workers: Option<usize>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub document_mount: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub permission_file: Option<PathBuf>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dialog_default: Option<DialogDefault>,
	/// Fixed position reported to tracking requests.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub location: Option<Location>,
	/// Proxy returned for every lookup instead of the environment's.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub proxy: Option<String>,
}

impl PortalConfig {
	pub fn new() -> Self {
		Self {
			schema: SCHEMA_VERSION,
			..Default::default()
		}
	}

	/// Default config file location.
	pub fn default_path() -> PathBuf {
		dirs::config_dir()
			.unwrap_or_else(|| PathBuf::from("."))
			.join("portal")
			.join("config.json")
	}

	/// Loads `path`. A missing file is an empty config.
	///
	/// # Errors
	///
	/// Unreadable or malformed files, and files from a newer schema.
	pub fn load(path: &Path) -> Result<Self> {
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
			Err(source) => {
				return Err(CliError::ConfigRead {
					path: path.to_path_buf(),
					source,
				});
			}
		};
		let config: PortalConfig = serde_json::from_str(&content).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		if config.schema > SCHEMA_VERSION {
			return Err(CliError::ConfigSchema {
				found: config.schema,
				supported: SCHEMA_VERSION,
			});
		}
		Ok(config)
	}

	pub fn save(&self, path: &Path) -> Result<()> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}
		fs::write(path, serde_json::to_string_pretty(self)?)?;
		Ok(())
	}

	/// Overlays every key set in `other`.
	pub fn merge(&mut self, other: &PortalConfig) {
		self.schema = self.schema.max(other.schema);
		if other.socket_path.is_some() {
			self.socket_path.clone_from(&other.socket_path);
		}
		if other.workers.is_some() {
			self.workers = other.workers;
		}
		if other.document_mount.is_some() {
			self.document_mount.clone_from(&other.document_mount);
		}
		if other.permission_file.is_some() {
			self.permission_file.clone_from(&other.permission_file);
		}
		if other.dialog_default.is_some() {
			self.dialog_default = other.dialog_default;
		}
		if other.location.is_some() {
			self.location.clone_from(&other.location);
		}
		if other.proxy.is_some() {
			self.proxy.clone_from(&other.proxy);
		}
	}
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
	pub socket_path: PathBuf,
	pub workers: usize,
	pub document_mount: PathBuf,
	pub permission_file: PathBuf,
	pub dialog_default: DialogDefault,
	pub location: Option<Location>,
	pub proxy: Option<String>,
}

impl Settings {
	/// Resolves `config` with `overrides` (command line flags) on top.
	pub fn resolve(config: &PortalConfig, overrides: &PortalConfig) -> Self {
		let mut merged = config.clone();
		merged.merge(overrides);

		Self {
			socket_path: merged.socket_path.unwrap_or_else(daemon::socket_path),
			workers: merged.workers.filter(|&n| n > 0).unwrap_or(DEFAULT_WORKERS),
			document_mount: merged.document_mount.unwrap_or_else(default_document_mount),
			permission_file: merged.permission_file.unwrap_or_else(default_permission_file),
			dialog_default: merged.dialog_default.unwrap_or_default(),
			location: merged.location,
			proxy: merged.proxy,
		}
	}
}

fn default_document_mount() -> PathBuf {
	match dirs::runtime_dir() {
		Some(dir) => dir.join("doc"),
		None => {
			let uid = unsafe { libc::getuid() };
			PathBuf::from(format!("/tmp/portal-doc-{uid}"))
		}
	}
}

/// Default permission store file.
pub fn default_permission_file() -> PathBuf {
	dirs::data_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("portal")
		.join("permissions.json")
}
