//! Interactive shells and the transport underneath them.
//!
//! Only the root hop of a chain opens a real SSH connection. Every later hop
//! is typed into the shell of the previous one, so the engine talks to the
//! remote side exclusively through [`ShellChannel`]. [`Transport`] is the
//! connection that can open additional shells, and [`Connector`] creates
//! transports for root hops.
//!
//! # Main Components
//!
//! - [`SshConnector`] - Opens async-ssh2-tokio connections with a security profile
//! - [`SshShell`] - PTY shell fed by a background I/O task
//! - [`scripted`] - Network-free shells that replay canned replies

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::JumpError;

pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::{SshConnector, SshShell, SshTransport};

/// Largest chunk taken from a shell in one receive.
pub const MAX_RECEIVE: usize = 10_000_000;

/// A live interactive byte stream.
///
/// Reads never block: callers poll [`has_pending_data`](Self::has_pending_data)
/// and sleep between polls.
#[async_trait]
pub trait ShellChannel: Send {
    /// Writes `text` to the remote side as is.
    async fn send(&mut self, text: &str) -> Result<(), JumpError>;

    /// True when at least one byte can be received.
    fn has_pending_data(&mut self) -> bool;

    /// Takes up to `max_bytes` of the bytes received so far.
    fn receive(&mut self, max_bytes: usize) -> Vec<u8>;

    /// True once the remote side reported an exit status.
    fn exit_status_ready(&mut self) -> bool;

    /// True once the remote side closed the stream.
    fn is_closed(&mut self) -> bool;
}

/// An authenticated connection able to open interactive shells.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new PTY shell on this connection.
    async fn open_shell(&self) -> Result<Box<dyn ShellChannel>, JumpError>;

    async fn close(&self) -> Result<(), JumpError>;
}

/// Where and how to open a root hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Creates transports for root hops.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn Transport>, JumpError>;
}

pub mod scripted;
mod security;
mod ssh;
