//! Error types for configuration loading, jumping and command execution.
//!
//! Configuration value problems are recoverable: callers log them and fall
//! back to the documented default. Everything raised while establishing a
//! hop is fatal for the whole run.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while loading a chain and driving it.
#[derive(Error, Debug)]
pub enum JumpError {
    /// A numeric field (`delay`, `cmd_timeout`, `port`) could not be parsed.
    #[error("invalid {field} value: {value}")]
    ConfigValue { field: &'static str, value: String },

    /// A configuration line or block does not have the expected shape.
    #[error("malformed configuration: {0}")]
    ConfigStructure(String),

    /// The configuration file could not be read.
    #[error("unable to read configuration file {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A command file could not be read.
    #[error("unable to read command file {path}: {source}")]
    CommandFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An output or audit log file could not be opened.
    #[error("unable to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The fan-out stage has a node list but no jumpbox to reach them with.
    #[error("empty jumpbox")]
    EmptyJumpbox,

    /// The first hop of a chain must be a secure-shell connection.
    #[error("{0} cannot be used as the first hop, jump to a secure-shell node first")]
    UnsupportedRootHop(String),

    /// The `jump_cmd` of a later hop is neither `ssh` nor a vendor tool.
    #[error("{0} not supported")]
    UnsupportedMethod(String),

    /// Jumping to a node failed. Wraps the underlying cause.
    #[error("{node} connection failed: {source}")]
    Jump {
        node: String,
        #[source]
        source: Box<JumpError>,
    },

    /// The transport refused the connection.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The shell went away while a response was still expected.
    #[error("channel disconnect while waiting for output")]
    ChannelDisconnect,

    /// Reading credentials from the terminal failed.
    #[error("unable to read credentials: {0}")]
    Credential(#[source] std::io::Error),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to hand data to the shell I/O task.
    #[error("failed to send data: {0}")]
    SendDataError(#[from] SendError<Vec<u8>>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl JumpError {
    /// Wraps `self` as the cause of a failed jump to `node`.
    pub fn at_node(self, node: impl Into<String>) -> JumpError {
        JumpError::Jump {
            node: node.into(),
            source: Box::new(self),
        }
    }

    /// Name of the node a jump failed on, if this is a jump failure.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            JumpError::Jump { node, .. } => Some(node),
            _ => None,
        }
    }
}
