//! Error types for the portal runtime.

use portal_protocol::ErrorName;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the request engine, session registry and handlers.
#[derive(Debug, Error)]
pub enum Error {
	/// Unknown or foreign request/session id. Both cases read the same.
	#[error("{0}")]
	AccessDenied(String),

	/// The caller's sandbox forbids the operation.
	#[error("{0}")]
	NotAllowed(String),

	/// Malformed input from the caller.
	#[error("{0}")]
	InvalidArgument(String),

	/// `export` was called on a request that is not in the created state.
	#[error("Request already exported: {0}")]
	AlreadyExported(String),

	/// A freshly generated key is already registered.
	#[error("Key collision: {0}")]
	KeyCollision(String),

	/// A backend collaborator failed.
	#[error("Backend error: {0}")]
	Backend(String),

	/// The worker pool was shut down or a worker panicked.
	#[error("Worker pool unavailable: {0}")]
	Worker(String),

	/// Channel to a connection closed unexpectedly.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Wire error name reported to the caller.
	pub fn kind(&self) -> ErrorName {
		match self {
			Error::AccessDenied(_) => ErrorName::AccessDenied,
			Error::NotAllowed(_) => ErrorName::NotAllowed,
			Error::InvalidArgument(_) => ErrorName::InvalidArgument,
			_ => ErrorName::Failed,
		}
	}

	/// Returns true if the error stems from the caller's input or identity
	/// rather than from the broker or a backend.
	pub fn is_caller_error(&self) -> bool {
		matches!(
			self,
			Error::AccessDenied(_) | Error::NotAllowed(_) | Error::InvalidArgument(_)
		)
	}

	pub fn backend(err: impl std::fmt::Display) -> Self {
		Error::Backend(err.to_string())
	}
}
