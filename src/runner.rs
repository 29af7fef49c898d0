//! Running a command list on an established shell.

use std::time::Duration;

use log::{debug, info};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::commands::CommandList;
use crate::config::Jumpbox;
use crate::detector::{DetectMode, PromptSet, ResponseDetector};
use crate::error::JumpError;
use crate::session::ShellChannel;

/// Sends a node's commands one after another and appends every response to
/// an output sink.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    node: String,
    commands: CommandList,
    delay: Duration,
    mode: DetectMode,
    detector: ResponseDetector,
}

impl CommandRunner {
    /// Builds a runner from the pacing and detection settings of `jumpbox`.
    ///
    /// `blocking` selects prompt matching, otherwise the idle timeout is
    /// used. Malformed `delay` or `cmd_timeout` values are reported and
    /// replaced by their defaults.
    pub fn new(
        jumpbox: &Jumpbox,
        node: impl Into<String>,
        commands: CommandList,
        blocking: bool,
        detector: ResponseDetector,
    ) -> Self {
        let delay = jumpbox.delay_or_default();
        let timeout = jumpbox.cmd_timeout_or_default();
        let mode = if blocking {
            DetectMode::Prompt(PromptSet::new(jumpbox.prompts()))
        } else {
            DetectMode::Idle(timeout)
        };
        Self {
            node: node.into(),
            commands,
            delay,
            mode,
            detector,
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn mode(&self) -> &DetectMode {
        &self.mode
    }

    /// Runs every command, pausing `delay` after each, then shuts the sink.
    /// The sink is shut down even when a command fails.
    pub async fn execute<W>(&self, shell: &mut dyn ShellChannel, mut sink: W) -> Result<(), JumpError>
    where
        W: AsyncWrite + Unpin,
    {
        info!("executing {} commands on {}", self.commands.len(), self.node);
        let ran = self.run_commands(shell, &mut sink).await;
        let shut = sink.shutdown().await;
        ran?;
        shut?;
        Ok(())
    }

    async fn run_commands<W>(&self, shell: &mut dyn ShellChannel, sink: &mut W) -> Result<(), JumpError>
    where
        W: AsyncWrite + Unpin,
    {
        for command in self.commands.iter() {
            let output = self.detector.exchange(shell, command, &self.mode).await?;
            debug!("{}: {:?} returned {} bytes", self.node, command, output.len());
            sink.write_all(output.as_bytes()).await?;
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::{Script, ScriptedShell, Transcript};
    use std::io;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use tokio::time::Instant;

    /// Refuses every write and remembers whether it was shut down.
    struct FullDisk {
        shut: Arc<AtomicBool>,
    }

    impl AsyncWrite for FullDisk {
        fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shut.store(true, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    fn jumpbox() -> Jumpbox {
        Jumpbox {
            delay: Some("1".to_string()),
            cmd_timeout: Some("0.3".to_string()),
            prompts: Some("$".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn blocking_flag_selects_detection_mode() {
        let commands = CommandList::default();
        let blocking = CommandRunner::new(&jumpbox(), "a", commands.clone(), true, ResponseDetector::default());
        let idle = CommandRunner::new(&jumpbox(), "a", commands, false, ResponseDetector::default());

        assert_eq!(blocking.mode(), &DetectMode::Prompt(PromptSet::new("$")));
        assert_eq!(idle.mode(), &DetectMode::Idle(Duration::from_millis(300)));
    }

    #[test]
    fn malformed_pacing_values_use_defaults() {
        let jumpbox = Jumpbox {
            delay: Some("x".to_string()),
            cmd_timeout: Some("y".to_string()),
            ..Default::default()
        };
        let runner = CommandRunner::new(&jumpbox, "a", CommandList::default(), false, ResponseDetector::default());

        assert_eq!(runner.delay(), Duration::ZERO);
        assert_eq!(runner.mode(), &DetectMode::Idle(Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn outputs_are_appended_in_order_with_pacing() {
        let transcript = Transcript::default();
        let mut shell = ScriptedShell::new(
            Script::new()
                .reply("uptime", ["uptime\r\nup 3 days\r\nh$ "])
                .reply("date", ["date\r\nMon\r\nh$ "]),
            transcript.clone(),
        );
        let commands: CommandList = ["uptime", "date"].into_iter().collect();
        let runner = CommandRunner::new(&jumpbox(), "h", commands, true, ResponseDetector::default());

        let started = Instant::now();
        let mut sink = Vec::new();
        runner.execute(&mut shell, &mut sink).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(transcript.lines(), vec!["uptime", "date"]);
        assert_eq!(
            String::from_utf8(sink).unwrap(),
            "uptime\r\nup 3 days\r\nh$ date\r\nMon\r\nh$ "
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sink_is_shut_down_when_a_write_fails() {
        let mut shell = ScriptedShell::new(
            Script::new().reply("uptime", ["up 3 days\r\nh$ "]),
            Transcript::default(),
        );
        let commands: CommandList = ["uptime", "date"].into_iter().collect();
        let runner = CommandRunner::new(&jumpbox(), "h", commands, true, ResponseDetector::default());
        let shut = Arc::new(AtomicBool::new(false));

        let err = runner
            .execute(&mut shell, FullDisk { shut: shut.clone() })
            .await
            .unwrap_err();

        assert!(matches!(err, JumpError::Io(_)));
        assert!(shut.load(Ordering::SeqCst));
    }
}
