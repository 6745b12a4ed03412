//! File descriptor passing over Unix stream sockets (`SCM_RIGHTS`).
//!
//! A client writes one call line in a single `sendmsg` with the descriptors
//! attached; the daemon collects descriptors as they arrive and hands them
//! to the next complete line.

use std::io;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tokio::io::Interest;
use tokio::net::UnixStream;
use tracing::warn;

/// Most descriptors accepted with one message.
pub const MAX_FDS: usize = 64;

/// Longest call line accepted before the connection is dropped.
pub const MAX_LINE: usize = 1 << 20;

fn control_len(count: usize) -> usize {
	unsafe { libc::CMSG_SPACE((count * size_of::<RawFd>()) as u32) as usize }
}

/// Reads into `buf`, appending received descriptors to `fds`.
pub fn recv_with_fds(socket: BorrowedFd<'_>, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> io::Result<usize> {
	// u64 storage keeps the control buffer aligned for `cmsghdr`.
	let mut control = vec![0u64; control_len(MAX_FDS).div_ceil(size_of::<u64>())];
	let mut iov = libc::iovec {
		iov_base: buf.as_mut_ptr().cast(),
		iov_len: buf.len(),
	};
	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = &mut iov;
	msg.msg_iovlen = 1;
	msg.msg_control = control.as_mut_ptr().cast();
	msg.msg_controllen = (control.len() * size_of::<u64>()) as _;

	let n = unsafe { libc::recvmsg(socket.as_raw_fd(), &mut msg, libc::MSG_CMSG_CLOEXEC) };
	if n < 0 {
		return Err(io::Error::last_os_error());
	}

	unsafe {
		let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
		while !cmsg.is_null() {
			if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
				let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
				let payload = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
				for i in 0..payload / size_of::<RawFd>() {
					fds.push(OwnedFd::from_raw_fd(std::ptr::read_unaligned(data.add(i))));
				}
			}
			cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
		}
	}

	if msg.msg_flags & libc::MSG_CTRUNC != 0 {
		warn!(target = "portal.fd", "descriptors truncated; more than {MAX_FDS} passed with one message");
	}
	Ok(n as usize)
}

/// Writes `data` with `fds` attached. Returns the bytes written, which may
/// be fewer than `data.len()`; descriptors go with the first byte.
pub fn send_with_fds(socket: BorrowedFd<'_>, data: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<usize> {
	if fds.len() > MAX_FDS {
		return Err(io::Error::new(
			io::ErrorKind::InvalidInput,
			format!("at most {MAX_FDS} descriptors per call"),
		));
	}

	let mut iov = libc::iovec {
		iov_base: data.as_ptr().cast_mut().cast(),
		iov_len: data.len(),
	};
	let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
	msg.msg_iov = &mut iov;
	msg.msg_iovlen = 1;

	let space = control_len(fds.len());
	let mut control = vec![0u64; space.div_ceil(size_of::<u64>())];
	if !fds.is_empty() {
		msg.msg_control = control.as_mut_ptr().cast();
		msg.msg_controllen = space as _;
		unsafe {
			let cmsg = libc::CMSG_FIRSTHDR(&msg);
			(*cmsg).cmsg_level = libc::SOL_SOCKET;
			(*cmsg).cmsg_type = libc::SCM_RIGHTS;
			(*cmsg).cmsg_len = libc::CMSG_LEN((fds.len() * size_of::<RawFd>()) as u32) as _;
			let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
			for (i, fd) in fds.iter().enumerate() {
				std::ptr::write_unaligned(data.add(i), fd.as_raw_fd());
			}
		}
	}

	let n = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, libc::MSG_NOSIGNAL) };
	if n < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(n as usize)
}

/// Writes all of `data`, attaching `fds` to the first chunk.
pub async fn write_with_fds(stream: &UnixStream, data: &[u8], fds: &[BorrowedFd<'_>]) -> io::Result<()> {
	let mut written = stream
		.async_io(Interest::WRITABLE, || send_with_fds(stream.as_fd(), data, fds))
		.await?;
	while written < data.len() {
		let rest = &data[written..];
		let n = stream
			.async_io(Interest::WRITABLE, || send_with_fds(stream.as_fd(), rest, &[]))
			.await?;
		if n == 0 {
			return Err(io::ErrorKind::WriteZero.into());
		}
		written += n;
	}
	Ok(())
}

/// One complete line together with the descriptors that arrived with it.
#[derive(Debug)]
pub struct Frame {
	pub line: String,
	pub fds: Vec<OwnedFd>,
}

/// Splits a byte stream into lines and pairs each with pending descriptors.
#[derive(Debug, Default)]
pub struct LineReader {
	buf: Vec<u8>,
	fds: Vec<OwnedFd>,
	eof: bool,
}

impl LineReader {
	pub fn new() -> Self {
		Self::default()
	}

	/// Next frame, or `None` at end of stream. A trailing line without a
	/// newline is returned before `None`.
	pub async fn next_frame(&mut self, stream: &UnixStream) -> io::Result<Option<Frame>> {
		loop {
			if let Some(frame) = self.take_line()? {
				return Ok(Some(frame));
			}
			if self.eof {
				return Ok(None);
			}
			let mut chunk = [0u8; 8192];
			let n = stream
				.async_io(Interest::READABLE, || recv_with_fds(stream.as_fd(), &mut chunk, &mut self.fds))
				.await?;
			if n == 0 {
				self.eof = true;
			} else {
				self.buf.extend_from_slice(&chunk[..n]);
			}
		}
	}

	fn take_line(&mut self) -> io::Result<Option<Frame>> {
		let end = match self.buf.iter().position(|&b| b == b'\n') {
			Some(pos) => pos,
			None if self.eof && !self.buf.is_empty() => self.buf.len(),
			None if self.buf.len() > MAX_LINE => {
				return Err(io::Error::new(io::ErrorKind::InvalidData, "call line too long"));
			}
			None => return Ok(None),
		};
		let mut raw: Vec<u8> = self.buf.drain(..end).collect();
		if !self.buf.is_empty() {
			self.buf.remove(0);
		}
		if raw.last() == Some(&b'\r') {
			raw.pop();
		}
		let line = String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
		Ok(Some(Frame {
			line,
			fds: std::mem::take(&mut self.fds),
		}))
	}
}

#[cfg(test)]
mod tests {
	use std::io::{Read, Seek, Write};

	use super::*;

	#[tokio::test]
	async fn descriptors_travel_with_their_line() {
		let (client, server) = UnixStream::pair().unwrap();
		let mut file = tempfile::tempfile().unwrap();
		file.write_all(b"payload").unwrap();

		write_with_fds(&client, b"{\"serial\":1}\n{\"serial\":2}\n", &[file.as_fd()])
			.await
			.unwrap();
		drop(client);

		let mut reader = LineReader::new();
		let first = reader.next_frame(&server).await.unwrap().unwrap();
		assert_eq!(first.line, "{\"serial\":1}");
		assert_eq!(first.fds.len(), 1);

		let second = reader.next_frame(&server).await.unwrap().unwrap();
		assert_eq!(second.line, "{\"serial\":2}");
		assert!(second.fds.is_empty());
		assert!(reader.next_frame(&server).await.unwrap().is_none());

		let mut received = std::fs::File::from(first.fds.into_iter().next().unwrap());
		received.rewind().unwrap();
		let mut content = String::new();
		received.read_to_string(&mut content).unwrap();
		assert_eq!(content, "payload");
	}

	#[tokio::test]
	async fn unterminated_last_line_is_returned() {
		let (client, server) = UnixStream::pair().unwrap();
		write_with_fds(&client, b"tail", &[]).await.unwrap();
		drop(client);

		let mut reader = LineReader::new();
		assert_eq!(reader.next_frame(&server).await.unwrap().unwrap().line, "tail");
		assert!(reader.next_frame(&server).await.unwrap().is_none());
	}

	#[test]
	fn too_many_descriptors_are_rejected() {
		let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
		let fds: Vec<BorrowedFd<'_>> = (0..=MAX_FDS).map(|_| a.as_fd()).collect();
		let err = send_with_fds(a.as_fd(), b"x", &fds).unwrap_err();
		assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
	}
}
