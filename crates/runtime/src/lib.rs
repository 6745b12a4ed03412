//! Request lifecycle engine and shared state for the portal broker.
//!
//! Every broker method that talks to the user or a backend runs as a
//! [`Request`]: created per call, exported on the caller's connection, and
//! retired after exactly one response. Methods whose state spans several
//! calls keep it in a [`SessionRegistry`].
//!
//! # Main Types
//!
//! - [`RequestRegistry`] / [`RequestGuard`] - request arena and per-request lock
//! - [`Engine`] / [`Capability`] - the invoke pipeline shared by request-based methods
//! - [`SessionRegistry`] - keyed sessions owned by one connection
//! - [`Permissions`] - stored decisions plus the access dialog
//! - [`WorkerPool`] - bounded pool for blocking handler bodies

pub mod bus;
pub mod engine;
pub mod error;
pub mod identity;
pub mod permission;
pub mod request;
pub mod session;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bus::{BackendHandle, Bus};
pub use engine::{Capability, Completion, Engine};
pub use error::{Error, Result};
pub use identity::{AppIdentity, Caller, ConnectionId, IdentityResolver, PeerCredentials};
pub use permission::{
	Access, AccessBackend, AccessDialog, Decision, GeolocationSchema, PermissionEntry, PermissionKey,
	PermissionSchema, PermissionStore, Permissions, YesNoAsk,
};
pub use request::{Phase, Request, RequestGuard, RequestRegistry};
pub use session::{Session, SessionGuard, SessionRegistry};
pub use worker::{DEFAULT_WORKERS, WorkerPool};
