use std::collections::VecDeque;
use std::sync::Arc;

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use async_trait::async_trait;
use log::{debug, trace};
use russh::ChannelMsg;
use russh::client::Msg;
use tokio::sync::mpsc::{self, UnboundedReceiver, error::TryRecvError};

use super::*;

/// Opens root hops over SSH with password authentication.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    security: ConnectionSecurityOptions,
}

impl SshConnector {
    pub fn new(security: ConnectionSecurityOptions) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Arc<dyn Transport>, JumpError> {
        let label = format!("{}@{}:{}", target.username, target.host, target.port);

        // No inactivity timeout: command delays and vendor consoles can keep
        // the line silent for a long time.
        let config = Config {
            preferred: self.security.preferred(),
            inactivity_timeout: None,
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (target.host.clone(), target.port),
            &target.username,
            AuthMethod::with_password(&target.password),
            self.security.server_check.clone(),
            config,
        )
        .await?;
        debug!("{} TCP connection successful", label);

        Ok(Arc::new(SshTransport { client, label }))
    }
}

/// An authenticated SSH connection.
pub struct SshTransport {
    client: Client,
    label: String,
}

#[async_trait]
impl Transport for SshTransport {
    async fn open_shell(&self) -> Result<Box<dyn ShellChannel>, JumpError> {
        let mut channel = self.client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", self.label);

        Ok(Box::new(SshShell::spawn(channel, self.label.clone())))
    }

    async fn close(&self) -> Result<(), JumpError> {
        if self.client.is_closed() {
            debug!("{} already closed", self.label);
            return Ok(());
        }
        self.client.disconnect().await?;
        debug!("{} SSH connection closed", self.label);
        Ok(())
    }
}

enum ShellEvent {
    Data(Vec<u8>),
    ExitStatus(u32),
}

/// A PTY shell on an SSH channel.
///
/// A background task owns the russh channel: it forwards writes from
/// [`send`](ShellChannel::send) and pushes received data into a queue that
/// the non-blocking read methods drain.
pub struct SshShell {
    writer: mpsc::Sender<Vec<u8>>,
    events: UnboundedReceiver<ShellEvent>,
    pending: VecDeque<u8>,
    exit_status: Option<u32>,
    closed: bool,
}

impl SshShell {
    fn spawn(mut channel: russh::Channel<Msg>, label: String) -> Self {
        let (writer, mut from_user) = mpsc::channel::<Vec<u8>>(256);
        let (to_user, events) = mpsc::unbounded_channel::<ShellEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(data) = from_user.recv() => {
                        if let Err(e) = channel.data(&data[..]).await {
                            debug!("{} Failed to send data to shell: {:?}", label, e);
                            break;
                        }
                    },
                    Some(msg) = channel.wait() => {
                        match msg {
                            ChannelMsg::Data { ref data } | ChannelMsg::ExtendedData { ref data, .. } => {
                                trace!("{} received {} bytes", label, data.len());
                                if to_user.send(ShellEvent::Data(data.to_vec())).is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", label);
                                    break;
                                }
                            }
                            ChannelMsg::ExitStatus { exit_status } => {
                                debug!("{} Shell exited with status code: {}", label, exit_status);
                                let _ = to_user.send(ShellEvent::ExitStatus(exit_status));
                                let _ = channel.eof().await;
                                break;
                            }
                            ChannelMsg::Eof => {
                                debug!("{} Shell sent EOF.", label);
                                break;
                            }
                            _ => {}
                        }
                    }
                    else => break,
                }
            }
            debug!("{} shell I/O task ended.", label);
        });

        Self {
            writer,
            events,
            pending: VecDeque::new(),
            exit_status: None,
            closed: false,
        }
    }

    /// Moves everything the I/O task queued into the local buffer.
    fn pump(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(ShellEvent::Data(data)) => self.pending.extend(data),
                Ok(ShellEvent::ExitStatus(status)) => self.exit_status = Some(status),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ShellChannel for SshShell {
    async fn send(&mut self, text: &str) -> Result<(), JumpError> {
        self.writer.send(text.as_bytes().to_vec()).await?;
        Ok(())
    }

    fn has_pending_data(&mut self) -> bool {
        self.pump();
        !self.pending.is_empty()
    }

    fn receive(&mut self, max_bytes: usize) -> Vec<u8> {
        self.pump();
        let n = max_bytes.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    fn exit_status_ready(&mut self) -> bool {
        self.pump();
        self.exit_status.is_some()
    }

    fn is_closed(&mut self) -> bool {
        self.pump();
        self.closed && self.pending.is_empty()
    }
}
