//! Deciding when a command's output is complete.
//!
//! Interactive shells never say "this command is done". Two heuristics are
//! offered, both polling the shell every [`POLL_INTERVAL`]:
//!
//! - prompt matching: stop once the last received fragment ends with one of
//!   the configured prompt characters. Fast, but waits forever if the remote
//!   never prints a recognised prompt.
//! - idle timeout: stop once nothing arrived for the configured quiet period.
//!   Slower, but works with consoles whose prompts are not single characters.

use std::io::Write;
use std::time::Duration;

use log::{debug, trace};

use crate::error::JumpError;
use crate::session::{MAX_RECEIVE, ShellChannel};

/// Sleep between two polls of a shell.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Characters that end a shell prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet(String);

impl PromptSet {
    pub fn new(chars: impl Into<String>) -> Self {
        Self(chars.into())
    }

    /// True when the last character of `text` is a prompt character.
    pub fn terminates(&self, text: &str) -> bool {
        text.chars().last().is_some_and(|c| self.0.contains(c))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Completion strategy for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectMode {
    /// Blocking mode: wait for a prompt character.
    Prompt(PromptSet),
    /// Non-blocking mode: wait for a quiet period.
    Idle(Duration),
}

/// Sends commands and collects their output.
#[derive(Debug, Clone)]
pub struct ResponseDetector {
    poll_interval: Duration,
    echo: bool,
}

impl Default for ResponseDetector {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            echo: false,
        }
    }
}

impl ResponseDetector {
    /// Also print every received fragment to stdout.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Runs `command` and waits according to `mode`.
    pub async fn exchange(
        &self,
        shell: &mut dyn ShellChannel,
        command: &str,
        mode: &DetectMode,
    ) -> Result<String, JumpError> {
        match mode {
            DetectMode::Prompt(prompts) => self.read_until_prompt(shell, command, prompts).await,
            DetectMode::Idle(timeout) => self.read_until_idle(shell, command, *timeout).await,
        }
    }

    /// Sends `command` and returns everything received up to and including
    /// the prompt line.
    ///
    /// Once data starts arriving it is drained until a fragment is blank or
    /// ends with a prompt character. An exit status reported by the remote
    /// side, or a closed stream, also ends the read.
    pub async fn read_until_prompt(
        &self,
        shell: &mut dyn ShellChannel,
        command: &str,
        prompts: &PromptSet,
    ) -> Result<String, JumpError> {
        shell.send(&format!("{command}\n")).await?;
        debug!("sent {:?}, waiting for one of {:?}", command, prompts.as_str());

        let mut received = String::new();
        let mut last = String::new();
        while !shell.exit_status_ready() && !shell.is_closed() {
            tokio::time::sleep(self.poll_interval).await;
            if shell.has_pending_data() {
                last = self.drain(shell);
                received.push_str(&last);
                while !last.is_empty() && !shell.exit_status_ready() && !shell.is_closed() {
                    tokio::time::sleep(self.poll_interval).await;
                    if shell.has_pending_data() {
                        last = self.drain(shell);
                        received.push_str(&last);
                    }
                    let fragment = last.trim();
                    if fragment.is_empty() || prompts.terminates(fragment) {
                        return Ok(received);
                    }
                }
            } else if prompts.terminates(last.trim()) {
                break;
            }
        }
        Ok(received)
    }

    /// Sends `command` and returns what arrived until the shell stayed quiet
    /// for longer than `timeout`.
    pub async fn read_until_idle(
        &self,
        shell: &mut dyn ShellChannel,
        command: &str,
        timeout: Duration,
    ) -> Result<String, JumpError> {
        shell.send(&format!("{command}\n")).await?;
        debug!("sent command, waiting for {:?} of silence", timeout);

        let mut received = String::new();
        let mut idle = Duration::ZERO;
        loop {
            if shell.has_pending_data() {
                let fragment = self.drain(shell);
                if !fragment.is_empty() {
                    idle = Duration::ZERO;
                }
                received.push_str(&fragment);
            } else if idle <= timeout {
                tokio::time::sleep(self.poll_interval).await;
                idle += self.poll_interval;
            } else {
                break;
            }
        }
        Ok(received)
    }

    /// Reads without sending anything until the accumulated text ends with
    /// `suffix`. Fails if the stream closes first.
    pub async fn read_until_suffix(
        &self,
        shell: &mut dyn ShellChannel,
        suffix: &str,
    ) -> Result<String, JumpError> {
        let mut received = String::new();
        loop {
            if shell.has_pending_data() {
                received.push_str(&self.drain(shell));
                if received.ends_with(suffix) {
                    return Ok(received);
                }
            } else if shell.is_closed() {
                return Err(JumpError::ChannelDisconnect);
            } else {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Takes whatever is available and decodes it.
    pub(crate) fn drain(&self, shell: &mut dyn ShellChannel) -> String {
        let bytes = shell.receive(MAX_RECEIVE);
        let text = String::from_utf8_lossy(&bytes).into_owned();
        trace!("{:?}", text);
        if self.echo && !text.is_empty() {
            echo(&mut std::io::stdout(), &text);
        }
        text
    }
}

/// Copies `text` to `out`. A failing writer only costs the echo.
fn echo(out: &mut impl Write, text: &str) -> bool {
    match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
        Ok(()) => true,
        Err(err) => {
            debug!("echoing output failed: {err}");
            false
        }
    }
}
