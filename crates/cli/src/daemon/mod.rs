//! The broker daemon: a Unix socket server speaking newline-delimited JSON.

mod client;
mod connections;
mod dispatch;
mod server;


use std::path::PathBuf;

pub use client::Client;
pub use connections::ConnectionBus;
pub use dispatch::Dispatcher;
pub use server::{Daemon, DaemonState, handle_client, serve_connection};

/// Returns the daemon socket path for the current user.
///
/// Uses `$XDG_RUNTIME_DIR/portal.sock` if available (already user-permissioned),
/// otherwise falls back to `/tmp/portal-{uid}.sock`.
pub fn socket_path() -> PathBuf {
	if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
		return PathBuf::from(xdg_runtime).join("portal.sock");
	}

	let uid = unsafe { libc::getuid() };
	PathBuf::from(format!("/tmp/portal-{uid}.sock"))
}

fn is_not_running(err: &std::io::Error) -> bool {
	matches!(
		err.kind(),
		std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
	)
}
