//! # boxjumper - Command runner for hosts behind jumpboxes
//!
//! `boxjumper` reaches hosts that sit behind one or more jumpboxes by typing
//! each hop into the shell of the previous one, then runs command files on
//! them and writes every response to a per-node output file. Only the first
//! hop opens an SSH connection itself; later hops are entered with `ssh` or a
//! vendor console tool launched from the previous host.
//!
//! ## Features
//!
//! - **Chains of any depth**: hop configuration is read from a simple
//!   `key = value` file with one block per hop
//! - **Fan-out**: the last jumpbox can reach a whole list of nodes, each with
//!   its own command file
//! - **Two completion heuristics**: prompt-character matching or an idle
//!   timeout
//! - **Audit trail**: `Accessing`, `Executing commands on` and `Leaving`
//!   lines for every hop
//! - **Algorithm profiles**: secure, balanced and legacy SSH algorithm lists
//!   for the root connection
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boxjumper::audit::AuditLog;
//! use boxjumper::config::ConfigLoader;
//! use boxjumper::credentials::TerminalCredentials;
//! use boxjumper::orchestrator::{Orchestrator, RunSettings};
//! use boxjumper::session::SshConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let entries = ConfigLoader::default().load_file("config.txt").await?;
//!     let connector = SshConnector::default();
//!     let orchestrator = Orchestrator::new(&connector, &TerminalCredentials, RunSettings::default());
//!
//!     let mut audit = AuditLog::create("boxjumper.log").await?;
//!     let report = orchestrator.run(entries, &mut audit).await?;
//!     audit.close().await?;
//!
//!     for path in report.outputs {
//!         println!("{}", path.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`config::ConfigLoader`] - Parses the hop configuration into [`config::Jumpbox`] blocks
//! - [`chain::SessionChain`] - Establishes hops and resets shells
//! - [`detector::ResponseDetector`] - Decides when a command's output is complete
//! - [`runner::CommandRunner`] - Runs one node's command list
//! - [`orchestrator::Orchestrator`] - Drives the chain and the fan-out stage
//! - [`error::JumpError`] - Error type shared by all of the above

pub mod algorithms;
pub mod audit;
pub mod chain;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod detector;
pub mod error;
pub mod fanout;
pub mod orchestrator;
pub mod outputs;
pub mod runner;
pub mod session;
