//! Network-free shells that answer from a script.
//!
//! A [`Script`] maps the beginning of a sent line to the chunks the "remote"
//! side answers with. Every shell opened from the same [`ScriptedConnector`]
//! writes what it was sent into one shared [`Transcript`], which makes the
//! order of commands across hops observable without any SSH server.
//!
//! ```
//! use boxjumper::session::scripted::Script;
//!
//! let script = Script::new()
//!     .reply("ssh ", ["b's password: "])
//!     .reply("show", ["show\r\nok\r\nb$ "])
//!     .fallback(["\r\n$ "]);
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::*;

/// Canned replies keyed by the prefix of the sent text.
#[derive(Debug, Clone, Default)]
pub struct Script {
    rules: Vec<(String, Vec<String>)>,
    fallback: Vec<String>,
    exit_on: Option<String>,
    close_on: Option<String>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers text starting with `prefix` with `chunks`, one chunk per receive.
    /// The first matching rule wins.
    pub fn reply<I, S>(mut self, prefix: impl Into<String>, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .push((prefix.into(), chunks.into_iter().map(Into::into).collect()));
        self
    }

    /// Answer for text no rule matches. Defaults to nothing.
    pub fn fallback<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Reports an exit status after text starting with `prefix` was sent.
    pub fn exit_on(mut self, prefix: impl Into<String>) -> Self {
        self.exit_on = Some(prefix.into());
        self
    }

    /// Closes the stream after text starting with `prefix` was sent.
    pub fn close_on(mut self, prefix: impl Into<String>) -> Self {
        self.close_on = Some(prefix.into());
        self
    }

    fn answer(&self, text: &str) -> &[String] {
        self.rules
            .iter()
            .find(|(prefix, _)| text.starts_with(prefix.as_str()))
            .map(|(_, chunks)| chunks.as_slice())
            .unwrap_or(&self.fallback)
    }
}

/// Every line sent to scripted shells, in order.
#[derive(Debug, Clone, Default)]
pub struct Transcript(Arc<Mutex<Vec<String>>>);

impl Transcript {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line);
        }
    }

    /// Snapshot of the sent lines, trailing newline removed.
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().map(|lines| lines.clone()).unwrap_or_default()
    }
}

/// A shell answering from a [`Script`].
pub struct ScriptedShell {
    script: Arc<Script>,
    transcript: Transcript,
    pending: VecDeque<Vec<u8>>,
    exit_ready: bool,
    closed: bool,
}

impl ScriptedShell {
    pub fn new(script: Script, transcript: Transcript) -> Self {
        Self::from_shared(Arc::new(script), transcript)
    }

    fn from_shared(script: Arc<Script>, transcript: Transcript) -> Self {
        Self {
            script,
            transcript,
            pending: VecDeque::new(),
            exit_ready: false,
            closed: false,
        }
    }

    /// Queues `chunk` as if the remote side had sent it unprompted.
    pub fn push_output(&mut self, chunk: impl Into<String>) {
        self.pending.push_back(chunk.into().into_bytes());
    }

    /// Marks the stream as closed by the remote side.
    pub fn close_remote(&mut self) {
        self.closed = true;
    }
}

#[async_trait]
impl ShellChannel for ScriptedShell {
    async fn send(&mut self, text: &str) -> Result<(), JumpError> {
        if self.closed {
            return Err(JumpError::ChannelDisconnect);
        }
        self.transcript
            .push(text.strip_suffix('\n').unwrap_or(text).to_string());
        for chunk in self.script.answer(text) {
            self.pending.push_back(chunk.as_bytes().to_vec());
        }
        if let Some(prefix) = &self.script.exit_on
            && text.starts_with(prefix.as_str())
        {
            self.exit_ready = true;
        }
        if let Some(prefix) = &self.script.close_on
            && text.starts_with(prefix.as_str())
        {
            self.closed = true;
        }
        Ok(())
    }

    fn has_pending_data(&mut self) -> bool {
        !self.pending.is_empty()
    }

    fn receive(&mut self, max_bytes: usize) -> Vec<u8> {
        let Some(mut chunk) = self.pending.pop_front() else {
            return Vec::new();
        };
        if chunk.len() > max_bytes {
            let rest = chunk.split_off(max_bytes);
            self.pending.push_front(rest);
        }
        chunk
    }

    fn exit_status_ready(&mut self) -> bool {
        self.exit_ready
    }

    fn is_closed(&mut self) -> bool {
        self.closed && self.pending.is_empty()
    }
}

/// A transport whose shells answer from a shared [`Script`].
pub struct ScriptedTransport {
    host: String,
    script: Arc<Script>,
    transcript: Transcript,
    shells_opened: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedTransport {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn shells_opened(&self) -> usize {
        self.shells_opened.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open_shell(&self) -> Result<Box<dyn ShellChannel>, JumpError> {
        if self.is_closed() {
            return Err(JumpError::ChannelDisconnect);
        }
        self.shells_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedShell::from_shared(
            self.script.clone(),
            self.transcript.clone(),
        )))
    }

    async fn close(&self) -> Result<(), JumpError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`ScriptedTransport`]s and remembers them for inspection.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
    transcript: Transcript,
    refused: HashSet<String>,
    transports: Mutex<Vec<Arc<ScriptedTransport>>>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            ..Default::default()
        }
    }

    /// Makes connections to `host` fail.
    pub fn refuse(mut self, host: impl Into<String>) -> Self {
        self.refused.insert(host.into());
        self
    }

    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }

    /// Transports opened so far, in connection order.
    pub fn transports(&self) -> Vec<Arc<ScriptedTransport>> {
        self.transports
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn Transport>, JumpError> {
        if self.refused.contains(&target.host) {
            return Err(JumpError::Connect(format!(
                "{}:{} refused the connection",
                target.host, target.port
            )));
        }
        let transport = Arc::new(ScriptedTransport {
            host: target.host.clone(),
            script: self.script.clone(),
            transcript: self.transcript.clone(),
            shells_opened: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        if let Ok(mut transports) = self.transports.lock() {
            transports.push(transport.clone());
        }
        Ok(transport)
    }
}
