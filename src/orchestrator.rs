//! Driving a whole configuration: the jump chain, then the fan-out stage.
//!
//! Single-node blocks are entered one after another, each hop typed into the
//! shell of the previous one. Their command files run on the way back out,
//! innermost hop first, so a jumpbox's own commands run only after every hop
//! behind it is done. A hop with more blocks behind it gets a fresh shell
//! before its commands run, because the shared one now sits on a deeper host.
//!
//! Once the head of the queue no longer names a single node, the remaining
//! blocks form a [`FanOutPlan`] that is run from the end of the chain.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::fs::File;

use crate::audit::{AuditEvent, AuditLog};
use crate::chain::{ChannelHandle, SessionChain};
use crate::commands::CommandList;
use crate::config::Jumpbox;
use crate::credentials::{self, CredentialProvider};
use crate::detector::ResponseDetector;
use crate::error::JumpError;
use crate::fanout::FanOutPlan;
use crate::outputs;
use crate::runner::CommandRunner;
use crate::session::Connector;

/// Run-wide switches.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Wait for a prompt character instead of an idle period.
    pub blocking: bool,
    /// Echo command output to stdout.
    pub print_output: bool,
    pub output_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            blocking: true,
            print_output: false,
            output_dir: PathBuf::from("."),
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Output files, in the order they were opened.
    pub outputs: Vec<PathBuf>,
}

/// A hop that was entered and still has to be left.
struct HopFrame {
    node: String,
    handle: ChannelHandle,
    job: Option<(CommandRunner, File)>,
    /// Blocks in the queue when this hop was taken, itself included.
    queued: usize,
    owns_transport: bool,
}

pub struct Orchestrator<'a> {
    connector: &'a dyn Connector,
    credentials: &'a dyn CredentialProvider,
    settings: RunSettings,
    vendor_timing: Option<(Duration, Duration)>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        connector: &'a dyn Connector,
        credentials: &'a dyn CredentialProvider,
        settings: RunSettings,
    ) -> Self {
        Self {
            connector,
            credentials,
            settings,
            vendor_timing: None,
        }
    }

    /// Overrides how long vendor consoles are given to start.
    pub fn with_vendor_timing(mut self, settle: Duration, poll: Duration) -> Self {
        self.vendor_timing = Some((settle, poll));
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Runs `entries` as loaded from a configuration file.
    ///
    /// Any failure closes the transports opened so far and is returned; a
    /// failed jump is wrapped in [`JumpError::Jump`] naming the node.
    pub async fn run(
        &self,
        entries: Vec<Jumpbox>,
        audit: &mut AuditLog,
    ) -> Result<RunReport, JumpError> {
        let chain = self.chain();
        let mut queue: VecDeque<Jumpbox> = entries.into();
        let mut frames: Vec<HopFrame> = Vec::new();
        let mut report = RunReport::default();

        if let Err(err) = self
            .descend(&chain, &mut queue, &mut frames, audit, &mut report)
            .await
        {
            abort(&frames).await;
            return Err(err);
        }

        while let Some(frame) = frames.pop() {
            if let Err(err) = self.leave(&chain, frame, audit).await {
                abort(&frames).await;
                return Err(err);
            }
        }
        info!("run finished, {} output files", report.outputs.len());
        Ok(report)
    }

    fn chain(&self) -> SessionChain<'a> {
        let chain = SessionChain::new(self.connector, ResponseDetector::default());
        match self.vendor_timing {
            Some((settle, poll)) => chain.with_vendor_timing(settle, poll),
            None => chain,
        }
    }

    fn runner(&self, jumpbox: &Jumpbox, node: &str, commands: CommandList) -> CommandRunner {
        let detector = ResponseDetector::default().with_echo(self.settings.print_output);
        CommandRunner::new(jumpbox, node, commands, self.settings.blocking, detector)
    }

    async fn descend(
        &self,
        chain: &SessionChain<'_>,
        queue: &mut VecDeque<Jumpbox>,
        frames: &mut Vec<HopFrame>,
        audit: &mut AuditLog,
        report: &mut RunReport,
    ) -> Result<(), JumpError> {
        while let Some(mut jumpbox) = queue.pop_front() {
            if !jumpbox.is_single_node() {
                queue.push_front(jumpbox);
                let rest = queue.drain(..).collect();
                let previous = frames.last().map(|f| &f.handle);
                return self.fan_out(chain, rest, previous, audit, report).await;
            }

            let queued = queue.len() + 1;
            let node = jumpbox.node.clone().unwrap_or_default();
            credentials::backfill(&mut jumpbox, &node, self.credentials)?;
            audit
                .record(AuditEvent::Accessing { node: node.clone() })
                .await?;

            let job = match jumpbox.cmd_file.as_deref().map(str::trim) {
                Some(file) if !file.is_empty() => {
                    let commands = CommandList::load(file).await?;
                    let path = outputs::output_path(
                        &self.settings.output_dir,
                        &node,
                        jumpbox.log_file.as_deref(),
                    );
                    let sink = outputs::create_sink(&path).await?;
                    report.outputs.push(path);
                    Some((self.runner(&jumpbox, &node, commands), sink))
                }
                _ => None,
            };

            let owns_transport = frames.is_empty();
            let previous = frames.last().map(|f| &f.handle);
            let handle = chain
                .jump(&jumpbox, &node, previous)
                .await
                .map_err(|err| err.at_node(&node))?;
            debug!("reached {:?}", handle.path());

            frames.push(HopFrame {
                node,
                handle,
                job,
                queued,
                owns_transport,
            });
        }
        Ok(())
    }

    async fn leave(
        &self,
        chain: &SessionChain<'_>,
        frame: HopFrame,
        audit: &mut AuditLog,
    ) -> Result<(), JumpError> {
        let HopFrame {
            node,
            handle,
            job,
            queued,
            owns_transport,
        } = frame;

        let executed = match job {
            Some((runner, sink)) => {
                self.execute_on(chain, &handle, queued > 1, runner, sink, audit)
                    .await
            }
            None => Ok(()),
        };
        let closed = if owns_transport {
            handle.close_transport().await
        } else {
            Ok(())
        };
        executed?;
        closed?;
        audit.record(AuditEvent::Leaving { node }).await
    }

    async fn execute_on(
        &self,
        chain: &SessionChain<'_>,
        handle: &ChannelHandle,
        reset: bool,
        runner: CommandRunner,
        sink: File,
        audit: &mut AuditLog,
    ) -> Result<(), JumpError> {
        audit
            .record(AuditEvent::Executing {
                node: runner.node().to_string(),
            })
            .await?;
        let handle = if reset {
            chain
                .reset(handle)
                .await
                .map_err(|err| err.at_node(runner.node()))?
        } else {
            handle.clone()
        };
        let mut shell = handle.lock().await;
        runner.execute(shell.as_mut(), sink).await
    }

    async fn fan_out(
        &self,
        chain: &SessionChain<'_>,
        entries: Vec<Jumpbox>,
        previous: Option<&ChannelHandle>,
        audit: &mut AuditLog,
        report: &mut RunReport,
    ) -> Result<(), JumpError> {
        let Some(mut plan) = FanOutPlan::assemble(entries)? else {
            return Ok(());
        };
        credentials::backfill(&mut plan.jumpbox, &plan.nodes.join(", "), self.credentials)?;
        info!("fanning out to {} nodes", plan.nodes.len());

        for (node, file) in plan.assignments() {
            let commands = CommandList::load(file).await?;
            let path = outputs::output_path(&self.settings.output_dir, node, None);
            let sink = outputs::create_sink(&path).await?;
            report.outputs.push(path);
            audit
                .record(AuditEvent::Accessing {
                    node: node.to_string(),
                })
                .await?;

            let base = match previous {
                Some(handle) => Some(chain.reset(handle).await.map_err(|err| err.at_node(node))?),
                None => None,
            };
            let handle = chain
                .jump(&plan.jumpbox, node, base.as_ref())
                .await
                .map_err(|err| err.at_node(node))?;

            audit
                .record(AuditEvent::Executing {
                    node: node.to_string(),
                })
                .await?;
            let runner = self.runner(&plan.jumpbox, node, commands);
            let executed = {
                let mut shell = handle.lock().await;
                runner.execute(shell.as_mut(), sink).await
            };
            if previous.is_none() {
                handle.close_transport().await?;
            }
            executed?;
            audit
                .record(AuditEvent::Leaving {
                    node: node.to_string(),
                })
                .await?;
        }
        Ok(())
    }
}

/// Closes every transport owned by `frames`, innermost first.
async fn abort(frames: &[HopFrame]) {
    for frame in frames.iter().rev().filter(|f| f.owns_transport) {
        if let Err(err) = frame.handle.close_transport().await {
            warn!("closing transport to {} failed: {err}", frame.node);
        }
    }
}
