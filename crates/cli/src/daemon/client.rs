use std::os::fd::BorrowedFd;
use std::path::Path;

use portal_protocol::{Call, CallMessage, ReplyBody, ServerMessage, Signal};
use tokio::net::UnixStream;
use tracing::debug;

use super::is_not_running;
use crate::error::{CliError, Result};
use crate::fd::{self, LineReader};

/// A connection to the daemon.
pub struct Client {
	stream: UnixStream,
	reader: LineReader,
	next_serial: u32,
}

impl Client {
	pub async fn connect(socket: &Path) -> Result<Self> {
		let stream = UnixStream::connect(socket).await.map_err(|err| {
			if is_not_running(&err) {
				CliError::NotRunning(socket.to_path_buf())
			} else {
				err.into()
			}
		})?;
		debug!(target = "portal.client", socket = %socket.display(), "connected");
		Ok(Self::from_stream(stream))
	}

	pub fn from_stream(stream: UnixStream) -> Self {
		Self {
			stream,
			reader: LineReader::new(),
			next_serial: 1,
		}
	}

	/// Writes `call` with `fds` attached and returns its serial.
	pub async fn send(&mut self, call: Call, fds: &[BorrowedFd<'_>]) -> Result<u32> {
		let serial = self.next_serial;
		self.next_serial = self.next_serial.wrapping_add(1);
		let mut payload = serde_json::to_vec(&CallMessage { serial, call })?;
		payload.push(b'\n');
		fd::write_with_fds(&self.stream, &payload, fds).await?;
		Ok(serial)
	}

	/// Writes a raw line, newline added.
	pub async fn send_line(&mut self, line: &str) -> Result<()> {
		let mut payload = line.as_bytes().to_vec();
		payload.push(b'\n');
		fd::write_with_fds(&self.stream, &payload, &[]).await?;
		Ok(())
	}

	/// Next message from the daemon, `None` once it hangs up.
	pub async fn next_message(&mut self) -> Result<Option<ServerMessage>> {
		loop {
			let Some(frame) = self.reader.next_frame(&self.stream).await? else {
				return Ok(None);
			};
			if frame.line.trim().is_empty() {
				continue;
			}
			return Ok(Some(serde_json::from_str(&frame.line)?));
		}
	}

	/// Sends `call` and waits for its reply. Signals that arrive meanwhile
	/// are returned alongside it.
	///
	/// # Errors
	///
	/// [`CliError::Remote`] when the daemon answers with an error.
	pub async fn call(&mut self, call: Call, fds: &[BorrowedFd<'_>]) -> Result<(ReplyBody, Vec<Signal>)> {
		let serial = self.send(call, fds).await?;
		let mut signals = Vec::new();
		loop {
			match self.next_message().await? {
				Some(ServerMessage::Reply { serial: s, body }) if s == serial => return Ok((body, signals)),
				Some(ServerMessage::Error {
					serial: s, name, message, ..
				}) if s.is_none_or(|s| s == serial) => {
					return Err(CliError::Remote { name, message });
				}
				Some(ServerMessage::Signal(signal)) => signals.push(signal),
				Some(other) => debug!(target = "portal.client", ?other, "ignoring message for another call"),
				None => {
					return Err(CliError::Io(std::io::Error::new(
						std::io::ErrorKind::UnexpectedEof,
						"daemon closed the connection",
					)));
				}
			}
		}
	}

	/// Waits for the signal matching `member` on `path`.
	pub async fn wait_signal(&mut self, path: &str, member: &str) -> Result<Signal> {
		loop {
			match self.next_message().await? {
				Some(ServerMessage::Signal(signal)) if signal.path == path && signal.member == member => {
					return Ok(signal);
				}
				Some(_) => continue,
				None => {
					return Err(CliError::Io(std::io::Error::new(
						std::io::ErrorKind::UnexpectedEof,
						"daemon closed the connection",
					)));
				}
			}
		}
	}
}
