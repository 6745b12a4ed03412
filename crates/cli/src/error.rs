use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("unsupported config schema {found} (expected at most {supported})")]
	ConfigSchema { found: u32, supported: u32 },

	#[error("permission store {path} is corrupt: {source}")]
	PermissionStore {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("daemon is not running at {0}")]
	NotRunning(PathBuf),

	#[error("{name}: {message}")]
	Remote { name: String, message: String },

	#[error("invalid call: {0}")]
	InvalidCall(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Portal(#[from] portal_runtime::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl CliError {
	/// Process exit code for this error.
	pub fn exit_code(&self) -> i32 {
		match self {
			CliError::NotRunning(_) => 3,
			CliError::Remote { .. } => 2,
			_ => 1,
		}
	}
}
