//! Daemon and command line client of the portal broker.
//!
//! `portal serve` runs [`daemon::Daemon`] over a Unix socket with the
//! built-in [`backends`]; `portal call` and `portal permission` talk to a
//! running daemon and to the permission store.

pub mod backends;
pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fd;
pub mod identity;
pub mod logging;
pub mod permission_store;
