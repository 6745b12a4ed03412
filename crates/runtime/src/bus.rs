//! Outbound signal delivery.

use portal_protocol::Signal;

use crate::identity::ConnectionId;

/// Delivers signals to connected clients.
///
/// Implementations must not block: the daemon queues onto the connection's
/// writer task. Delivery to a connection that is already gone is dropped.
pub trait Bus: Send + Sync {
	/// Queues `signal` for `destination`. Returns false if the connection is gone.
	fn emit(&self, destination: &ConnectionId, signal: Signal) -> bool;
}

/// Cancellation handle for work a backend is doing on behalf of a request.
pub trait BackendHandle: Send {
	/// Asks the backend to abandon the interaction.
	fn close(&self);
}
