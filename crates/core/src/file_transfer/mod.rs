//! Cross-sandbox file transfer.
//!
//! An application starts a transfer, adds files to it by passing open
//! descriptors, and hands the transfer key to another application, which
//! retrieves the files re-exported through the document store so that its
//! own sandbox can open them.
//!
//! # Main Types
//!
//! - [`FileTransfer`] - the four transfer methods over a [`SessionRegistry`]
//! - [`DescriptorResolver`] - maps a passed descriptor to a path the sender may share
//! - [`DocumentStore`] - re-exports host paths to a target application

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use portal_protocol::StartTransferOptions;
use portal_runtime::{AppIdentity, Caller, ConnectionId, Error, Result, SessionRegistry};
use tracing::debug;


const INVALID_TRANSFER: &str = "Invalid transfer";
const CANT_EXPORT: &str = "Can't export file";

/// State of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
	files: Vec<PathBuf>,
	writable: bool,
	autostop: bool,
}

impl Transfer {
	pub fn files(&self) -> &[PathBuf] {
		&self.files
	}

	pub fn writable(&self) -> bool {
		self.writable
	}

	pub fn autostop(&self) -> bool {
		self.autostop
	}
}

/// A descriptor resolved to a host path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
	pub path: PathBuf,
	/// Whether the descriptor was opened for writing.
	pub writable: bool,
}

/// Resolves passed descriptors to paths the owning application may share.
pub trait DescriptorResolver: Send + Sync {
	/// Returns `None` when the descriptor does not name a file `app` can see.
	fn resolve(&self, app: &AppIdentity, fd: BorrowedFd<'_>) -> Option<ResolvedPath>;
}

/// How documents are registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddFlags {
	/// Reuse an existing document for the same file.
	pub reuse_existing: bool,
	/// Only create a document if the target could not already see the file.
	pub as_needed_by_app: bool,
}

/// Access granted to the target application on added documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentPermissions {
	pub read: bool,
	pub write: bool,
}

/// Store that exposes host files to sandboxed applications.
pub trait DocumentStore: Send + Sync {
	/// Root under which documents are visible as `<mount>/<id>/<basename>`.
	fn mount_point(&self) -> &Path;

	/// Registers `paths` for `target_app_id` on behalf of `owner`. Returns one
	/// id per path; an empty id means the target can use the path as is.
	fn add_full(
		&self,
		paths: &[PathBuf],
		flags: AddFlags,
		owner: &AppIdentity,
		target_app_id: &str,
		permissions: DocumentPermissions,
	) -> Result<Vec<String>>;
}

/// Picks the descriptors named by `indexes` out of those passed with a call.
///
/// # Errors
///
/// [`Error::InvalidArgument`] for an index with no matching descriptor.
pub fn select_descriptors<'a>(indexes: &[u32], passed: &'a [OwnedFd]) -> Result<Vec<BorrowedFd<'a>>> {
	indexes
		.iter()
		.map(|&index| {
			passed
				.get(index as usize)
				.map(|fd| fd.as_fd())
				.ok_or_else(|| Error::InvalidArgument(format!("No file descriptor for index {index}")))
		})
		.collect()
}

/// The file transfer methods.
#[derive(Clone)]
pub struct FileTransfer {
	sessions: SessionRegistry<Transfer>,
	resolver: Arc<dyn DescriptorResolver>,
	documents: Arc<dyn DocumentStore>,
}

impl FileTransfer {
	pub fn new(resolver: Arc<dyn DescriptorResolver>, documents: Arc<dyn DocumentStore>) -> Self {
		Self {
			sessions: SessionRegistry::new(),
			resolver,
			documents,
		}
	}

	pub fn sessions(&self) -> &SessionRegistry<Transfer> {
		&self.sessions
	}

	/// Opens a transfer owned by the caller's connection and returns its key.
	pub fn start(&self, caller: &Caller, options: &StartTransferOptions) -> Result<String> {
		let transfer = Transfer {
			files: Vec::new(),
			writable: options.writable(),
			autostop: options.autostop(),
		};
		let session = self
			.sessions
			.insert(caller.app.clone(), caller.connection.clone(), transfer)?;
		debug!(
			target = "portal.transfer",
			key = session.key(),
			owner = %caller.app,
			sender = %caller.connection,
			writable = options.writable(),
			autostop = options.autostop(),
			"start file transfer"
		);
		Ok(session.key().to_string())
	}

	/// Appends the files behind `fds` to the caller's transfer.
	///
	/// Nothing is appended unless every descriptor resolves; in a writable
	/// transfer every descriptor must also be open for writing.
	pub fn add_files(&self, caller: &Caller, key: &str, fds: &[BorrowedFd<'_>]) -> Result<()> {
		let session = self
			.sessions
			.get_owned(key, &caller.connection)
			.ok_or_else(|| Error::AccessDenied(INVALID_TRANSFER.to_string()))?;
		let mut transfer = session
			.lock()
			.ok_or_else(|| Error::AccessDenied(INVALID_TRANSFER.to_string()))?;

		let mut paths = Vec::with_capacity(fds.len());
		for fd in fds {
			match self.resolver.resolve(session.owner(), *fd) {
				Some(resolved) if !transfer.writable || resolved.writable => paths.push(resolved.path),
				_ => return Err(Error::NotAllowed(CANT_EXPORT.to_string())),
			}
		}

		debug!(
			target = "portal.transfer",
			key,
			count = paths.len(),
			owner = %session.owner(),
			"add files to file transfer"
		);
		transfer.files.extend(paths);
		Ok(())
	}

	/// Returns the transfer's files, re-exported for the caller.
	///
	/// The host gets raw paths. A sandboxed caller gets document paths. An
	/// autostop transfer ends after this call whatever the outcome.
	pub fn retrieve_files(&self, caller: &Caller, key: &str) -> Result<Vec<String>> {
		let session = self
			.sessions
			.get(key)
			.ok_or_else(|| Error::AccessDenied(INVALID_TRANSFER.to_string()))?;
		let mut transfer = session
			.lock()
			.ok_or_else(|| Error::AccessDenied(INVALID_TRANSFER.to_string()))?;

		debug!(
			target = "portal.transfer",
			key,
			count = transfer.files.len(),
			requester = %caller.app,
			owner = %session.owner(),
			"retrieve files from file transfer"
		);
		let files = self.export_for(&transfer, session.owner(), &caller.app);

		if transfer.autostop {
			transfer.stop();
		}
		files
	}

	/// Ends the caller's transfer.
	pub fn stop(&self, caller: &Caller, key: &str) -> Result<()> {
		let session = self
			.sessions
			.get_owned(key, &caller.connection)
			.ok_or_else(|| Error::AccessDenied(INVALID_TRANSFER.to_string()))?;
		let mut transfer = session
			.lock()
			.ok_or_else(|| Error::AccessDenied(INVALID_TRANSFER.to_string()))?;
		transfer.stop();
		Ok(())
	}

	/// Ends every transfer owned by a connection that went away.
	pub fn on_connection_lost(&self, connection: &ConnectionId) -> usize {
		self.sessions.on_connection_lost(connection)
	}

	fn export_for(&self, transfer: &Transfer, owner: &AppIdentity, target: &AppIdentity) -> Result<Vec<String>> {
		if target.is_host() {
			return Ok(transfer.files.iter().map(|p| p.to_string_lossy().into_owned()).collect());
		}

		let flags = AddFlags {
			reuse_existing: true,
			as_needed_by_app: true,
		};
		let permissions = DocumentPermissions {
			read: true,
			write: transfer.writable,
		};
		let ids = self
			.documents
			.add_full(&transfer.files, flags, owner, target.id(), permissions)?;
		if ids.len() != transfer.files.len() {
			return Err(Error::Backend(format!(
				"document store returned {} ids for {} files",
				ids.len(),
				transfer.files.len()
			)));
		}

		let mount = self.documents.mount_point();
		Ok(transfer
			.files
			.iter()
			.zip(ids)
			.map(|(file, id)| {
				if id.is_empty() {
					return file.to_string_lossy().into_owned();
				}
				let name = file.file_name().map(PathBuf::from).unwrap_or_default();
				mount.join(id).join(name).to_string_lossy().into_owned()
			})
			.collect())
	}
}
