use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use portal::Broker;
use portal_protocol::ServerMessage;
use portal_runtime::{AppIdentity, Caller, ConnectionId, IdentityResolver, PeerCredentials};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::ConnectionBus;
use super::dispatch::{Dispatcher, Jobs};
use crate::fd::{self, LineReader};

/// State shared by every connection.
pub struct DaemonState {
	bus: Arc<ConnectionBus>,
	dispatcher: Dispatcher,
	identities: Arc<dyn IdentityResolver>,
	next_connection: AtomicU64,
}

impl DaemonState {
	pub fn new(bus: Arc<ConnectionBus>, broker: Broker, identities: Arc<dyn IdentityResolver>) -> Arc<Self> {
		Arc::new(Self {
			dispatcher: Dispatcher::new(broker, bus.clone()),
			bus,
			identities,
			next_connection: AtomicU64::new(1),
		})
	}

	pub fn broker(&self) -> &Broker {
		self.dispatcher.broker()
	}

	pub fn bus(&self) -> &Arc<ConnectionBus> {
		&self.bus
	}

	fn next_connection_id(&self) -> ConnectionId {
		ConnectionId::numbered(self.next_connection.fetch_add(1, Ordering::Relaxed))
	}
}

pub struct Daemon {
	state: Arc<DaemonState>,
	socket_path: PathBuf,
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
	listener: UnixListener,
}

impl Daemon {
	/// Binds the listening socket, replacing a stale socket file.
	pub fn bind(socket_path: &Path, state: Arc<DaemonState>) -> Result<Self> {
		if socket_path.exists() {
			std::fs::remove_file(socket_path)
				.with_context(|| format!("Failed to remove existing socket: {}", socket_path.display()))?;
		}
		if let Some(parent) = socket_path.parent() {
			if !parent.exists() {
				std::fs::create_dir_all(parent)
					.with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
			}
		}
		let listener = UnixListener::bind(socket_path)
			.with_context(|| format!("Failed to bind daemon socket: {}", socket_path.display()))?;
		info!(target = "portal.daemon", socket = %socket_path.display(), "daemon listening");

		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		Ok(Self {
			state,
			socket_path: socket_path.to_path_buf(),
			shutdown_tx,
			shutdown_rx,
			listener,
		})
	}

	/// Sender that stops [`Daemon::run`] when `true` is sent.
	pub fn shutdown_handle(&self) -> watch::Sender<bool> {
		self.shutdown_tx.clone()
	}

	pub async fn run(mut self) -> Result<()> {
		let result = run_unix(&self.listener, &self.state, &mut self.shutdown_rx).await;
		self.state.broker().engine.workers().close();
		if let Err(err) = std::fs::remove_file(&self.socket_path) {
			debug!(target = "portal.daemon", error = %err, "socket file already gone");
		}
		result
	}
}

async fn run_unix(
	listener: &UnixListener,
	state: &Arc<DaemonState>,
	shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<()> {
	use tokio::signal::unix::{SignalKind, signal};

	let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
	let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

	loop {
		tokio::select! {
			_ = shutdown_rx.changed() => {
				if *shutdown_rx.borrow() {
					info!(target = "portal.daemon", "shutdown requested");
					break;
				}
			}
			_ = sigterm.recv() => {
				info!(target = "portal.daemon", "received SIGTERM, shutting down");
				break;
			}
			_ = sigint.recv() => {
				info!(target = "portal.daemon", "received SIGINT, shutting down");
				break;
			}
			accept = listener.accept() => {
				let (stream, _) = accept.context("Daemon accept failed")?;
				let state = Arc::clone(state);
				tokio::spawn(async move {
					if let Err(err) = handle_client(stream, state).await {
						warn!(target = "portal.daemon", error = %err, "daemon connection error");
					}
				});
			}
		}
	}

	Ok(())
}

/// Identifies the peer on `stream` and serves it until it disconnects.
pub async fn handle_client(stream: UnixStream, state: Arc<DaemonState>) -> Result<()> {
	let cred = stream.peer_cred().context("Failed to read peer credentials")?;
	let peer = PeerCredentials {
		pid: cred.pid(),
		uid: cred.uid(),
	};
	let app = match state.identities.resolve(&peer) {
		Ok(app) => app,
		Err(err) => {
			warn!(target = "portal.daemon", pid = ?peer.pid, uid = peer.uid, error = %err, "rejecting unidentified peer");
			write_message(&stream, &ServerMessage::error(None, err.kind(), err.to_string())).await?;
			return Ok(());
		}
	};
	serve_connection(stream, app, state).await
}

/// Serves an identified connection.
pub async fn serve_connection(stream: UnixStream, app: AppIdentity, state: Arc<DaemonState>) -> Result<()> {
	let connection = state.next_connection_id();
	let caller = Caller::new(app.clone(), connection.clone());
	info!(target = "portal.daemon", %connection, %app, "client connected");

	let stream = Arc::new(stream);
	let mut outbox = state.bus.register(connection.clone(), app);
	let writer_stream = Arc::clone(&stream);
	let writer = tokio::spawn(async move {
		while let Some(message) = outbox.recv().await {
			write_message(&writer_stream, &message).await?;
		}
		Ok::<_, anyhow::Error>(())
	});

	let jobs = Jobs::new();
	let mut reader = LineReader::new();
	let result = loop {
		match reader.next_frame(&stream).await {
			Ok(Some(frame)) if frame.line.trim().is_empty() => continue,
			Ok(Some(frame)) => state.dispatcher.dispatch(&caller, frame, &jobs),
			Ok(None) => break Ok(()),
			Err(err) => break Err(anyhow::Error::from(err).context("Failed reading call")),
		}
	};

	// Dropping the registration closes the outbox; the writer drains what
	// is queued and exits.
	state.bus.unregister(&connection);
	// A queued job could otherwise create state after it was released.
	jobs.finished().await;
	let broker = state.broker().clone();
	let workers = broker.engine.workers().clone();
	let lost = connection.clone();
	if let Err(err) = workers.run(move || broker.on_connection_lost(&lost)).await {
		warn!(target = "portal.daemon", %connection, error = %err, "failed to release connection state");
	}
	match writer.await {
		Ok(Err(err)) => debug!(target = "portal.daemon", %connection, error = %err, "writer stopped early"),
		Err(err) => warn!(target = "portal.daemon", %connection, error = %err, "writer task failed"),
		Ok(Ok(())) => {}
	}
	info!(target = "portal.daemon", %connection, "client disconnected");
	result
}

async fn write_message(stream: &UnixStream, message: &ServerMessage) -> Result<()> {
	let mut payload = serde_json::to_vec(message).context("Failed to serialize message")?;
	payload.push(b'\n');
	fd::write_with_fds(stream, &payload, &[])
		.await
		.context("Failed writing daemon message")?;
	Ok(())
}
