//! Outbound side of client connections.
//!
//! Every connection gets an unbounded queue drained by its writer task.
//! Replies and signals share that queue, so a reply queued before a signal
//! is written before it.

use std::sync::Arc;

use dashmap::DashMap;
use portal_protocol::{ServerMessage, Signal};
use portal_runtime::{AppIdentity, Bus, ConnectionId};
use tokio::sync::mpsc;
use tracing::trace;

struct Peer {
	app: AppIdentity,
	outbox: mpsc::UnboundedSender<ServerMessage>,
}

/// Routes messages to connected clients.
#[derive(Default)]
pub struct ConnectionBus {
	peers: DashMap<ConnectionId, Peer>,
}

impl ConnectionBus {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Registers a connection and returns the queue its writer drains.
	pub fn register(&self, connection: ConnectionId, app: AppIdentity) -> mpsc::UnboundedReceiver<ServerMessage> {
		let (outbox, inbox) = mpsc::unbounded_channel();
		self.peers.insert(connection, Peer { app, outbox });
		inbox
	}

	pub fn unregister(&self, connection: &ConnectionId) -> bool {
		self.peers.remove(connection).is_some()
	}

	/// Queues `message` for `connection`. False if it is gone.
	pub fn send(&self, connection: &ConnectionId, message: ServerMessage) -> bool {
		let Some(peer) = self.peers.get(connection) else {
			trace!(target = "portal.daemon", %connection, "dropping message for unknown connection");
			return false;
		};
		peer.outbox.send(message).is_ok()
	}

	/// Connections whose peer resolved to `app_id`, oldest first.
	pub fn connections_of(&self, app_id: &str) -> Vec<ConnectionId> {
		let mut found: Vec<ConnectionId> = self
			.peers
			.iter()
			.filter(|peer| !peer.app.is_host() && peer.app.id() == app_id)
			.map(|peer| peer.key().clone())
			.collect();
		found.sort_by_key(|id| connection_number(id));
		found
	}

	pub fn len(&self) -> usize {
		self.peers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.peers.is_empty()
	}
}

impl Bus for ConnectionBus {
	fn emit(&self, destination: &ConnectionId, signal: Signal) -> bool {
		self.send(destination, ServerMessage::Signal(signal))
	}
}

fn connection_number(id: &ConnectionId) -> u64 {
	id.as_str()
		.rsplit('.')
		.next()
		.and_then(|n| n.parse().ok())
		.unwrap_or(u64::MAX)
}
