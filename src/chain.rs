//! Establishing hops.
//!
//! The root hop opens a real SSH connection and a PTY shell on it. Every
//! later hop is entered by typing into the shell of the previous one: an
//! `ssh` invocation answered with the password, or a vendor console started
//! with the node as argument. The shell stream therefore stays the same
//! object along the whole chain; what changes is the [`ChannelHandle`]
//! describing which host that stream currently ends on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::{JumpMethod, Jumpbox};
use crate::detector::ResponseDetector;
use crate::error::JumpError;
use crate::session::{Connector, ShellChannel, SshTarget, Transport};

/// What a typed `ssh` prints when it wants the password.
pub const PASSWORD_PROMPT: &str = "assword: ";
/// Wait after launching a vendor console before looking at its output.
pub const VENDOR_SETTLE: Duration = Duration::from_secs(10);
/// Poll interval while a vendor console is still silent.
pub const VENDOR_POLL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct Waypoint {
    node: String,
    jumpbox: Jumpbox,
}

/// A shell positioned on one hop of a chain.
///
/// Cloning shares the shell. The handle remembers the hops typed into the
/// shell after the root so that [`SessionChain::reset`] can rebuild an
/// equivalent shell on the same transport.
#[derive(Clone)]
pub struct ChannelHandle {
    transport: Arc<dyn Transport>,
    shell: Arc<Mutex<Box<dyn ShellChannel>>>,
    root: String,
    route: Vec<Waypoint>,
}

impl ChannelHandle {
    fn root(transport: Arc<dyn Transport>, shell: Box<dyn ShellChannel>, node: &str) -> Self {
        Self {
            transport,
            shell: Arc::new(Mutex::new(shell)),
            root: node.to_string(),
            route: Vec::new(),
        }
    }

    fn descend(&self, node: &str, jumpbox: &Jumpbox) -> Self {
        let mut next = self.clone();
        next.route.push(Waypoint {
            node: node.to_string(),
            jumpbox: jumpbox.clone(),
        });
        next
    }

    /// The host this handle's shell currently ends on.
    pub fn node(&self) -> &str {
        self.route.last().map(|w| w.node.as_str()).unwrap_or(&self.root)
    }

    /// Hosts from the root to [`node`](Self::node).
    pub fn path(&self) -> Vec<&str> {
        std::iter::once(self.root.as_str())
            .chain(self.route.iter().map(|w| w.node.as_str()))
            .collect()
    }

    /// Exclusive access to the underlying shell.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn ShellChannel>> {
        self.shell.lock().await
    }

    /// True when both handles drive the same shell stream.
    pub fn shares_shell_with(&self, other: &ChannelHandle) -> bool {
        Arc::ptr_eq(&self.shell, &other.shell)
    }

    /// Closes the root transport and with it every shell of the chain.
    pub async fn close_transport(&self) -> Result<(), JumpError> {
        debug!("closing transport to {}", self.root);
        self.transport.close().await
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("path", &self.path())
            .finish()
    }
}

/// Performs jumps.
pub struct SessionChain<'a> {
    connector: &'a dyn Connector,
    detector: ResponseDetector,
    vendor_settle: Duration,
    vendor_poll: Duration,
}

impl<'a> SessionChain<'a> {
    pub fn new(connector: &'a dyn Connector, detector: ResponseDetector) -> Self {
        Self {
            connector,
            detector,
            vendor_settle: VENDOR_SETTLE,
            vendor_poll: VENDOR_POLL,
        }
    }

    pub fn with_vendor_timing(mut self, settle: Duration, poll: Duration) -> Self {
        self.vendor_settle = settle;
        self.vendor_poll = poll;
        self
    }

    /// Reaches `node` as described by `jumpbox`.
    ///
    /// Without `previous` a new transport is opened, which requires the
    /// `ssh` method. With `previous` the hop is typed into its shell and the
    /// returned handle shares that shell.
    pub async fn jump(
        &self,
        jumpbox: &Jumpbox,
        node: &str,
        previous: Option<&ChannelHandle>,
    ) -> Result<ChannelHandle, JumpError> {
        let Some(previous) = previous else {
            return self.open_root(jumpbox, node).await;
        };
        {
            let mut shell = previous.lock().await;
            self.enter(shell.as_mut(), jumpbox, node).await?;
        }
        info!("jumped from {} to {}", previous.node(), node);
        Ok(previous.descend(node, jumpbox))
    }

    /// Opens a fresh shell on the transport of `handle` and walks the same
    /// route again, so the new handle ends on the same host.
    ///
    /// Every hop of the route is entered again, so each vendor hop on it
    /// costs another [`VENDOR_SETTLE`] per reset. A fan-out behind a vendor
    /// hop pays that wait once per node.
    pub async fn reset(&self, handle: &ChannelHandle) -> Result<ChannelHandle, JumpError> {
        debug!("resetting channel for {}", handle.node());
        let mut shell = handle.transport.open_shell().await?;
        for waypoint in &handle.route {
            self.enter(shell.as_mut(), &waypoint.jumpbox, &waypoint.node)
                .await?;
        }
        Ok(ChannelHandle {
            transport: handle.transport.clone(),
            shell: Arc::new(Mutex::new(shell)),
            root: handle.root.clone(),
            route: handle.route.clone(),
        })
    }

    async fn open_root(&self, jumpbox: &Jumpbox, node: &str) -> Result<ChannelHandle, JumpError> {
        let method = jumpbox.method();
        if method != JumpMethod::SecureShell {
            return Err(JumpError::UnsupportedRootHop(method.to_string()));
        }
        let target = SshTarget {
            host: node.to_string(),
            port: jumpbox.port()?,
            username: jumpbox.username.clone().unwrap_or_default(),
            password: jumpbox.password.clone().unwrap_or_default(),
        };
        let transport = self.connector.connect(&target).await?;
        match transport.open_shell().await {
            Ok(shell) => {
                info!("connected to {}:{}", target.host, target.port);
                Ok(ChannelHandle::root(transport, shell, node))
            }
            Err(err) => {
                let _ = transport.close().await;
                Err(err)
            }
        }
    }

    async fn enter(
        &self,
        shell: &mut dyn ShellChannel,
        jumpbox: &Jumpbox,
        node: &str,
    ) -> Result<(), JumpError> {
        match jumpbox.method() {
            JumpMethod::SecureShell => {
                let port = jumpbox.port()?;
                let username = jumpbox.username.as_deref().unwrap_or_default();
                let password = jumpbox.password.as_deref().unwrap_or_default();
                shell
                    .send(&format!(
                        "ssh -o 'StrictHostKeyChecking no' {username}@{node} -p {port}\n"
                    ))
                    .await?;
                self.detector
                    .read_until_suffix(shell, PASSWORD_PROMPT)
                    .await?;
                let banner = self
                    .detector
                    .read_until_idle(shell, password, jumpbox.cmd_timeout_or_default())
                    .await?;
                trace!("{node} login banner: {banner:?}");
                Ok(())
            }
            JumpMethod::VendorTool(cmd) => {
                shell.send(&format!("{cmd} {node}\n")).await?;
                tokio::time::sleep(self.vendor_settle).await;
                while !shell.has_pending_data() && !shell.is_closed() {
                    tokio::time::sleep(self.vendor_poll).await;
                }
                if !shell.has_pending_data() {
                    return Err(JumpError::ChannelDisconnect);
                }
                let banner = self.detector.drain(shell);
                trace!("{node} {cmd} banner: {banner:?}");
                Ok(())
            }
            JumpMethod::Other(cmd) => Err(JumpError::UnsupportedMethod(cmd)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::{Script, ScriptedConnector};
    use tokio::time::Instant;

    fn hop(method: &str) -> Jumpbox {
        Jumpbox {
            jump_cmd: Some(method.to_string()),
            username: Some("ops".to_string()),
            password: Some("pw".to_string()),
            cmd_timeout: Some("0.2".to_string()),
            ..Default::default()
        }
    }

    fn script() -> Script {
        Script::new()
            .reply("ssh ", ["ops@b's password: "])
            .reply("amos ", ["Checking ip contact...OK\r\nrbs01> "])
            .fallback(["\r\nb$ "])
    }

    #[tokio::test]
    async fn root_hop_requires_secure_shell() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());

        let err = chain.jump(&hop("amos"), "rbs01", None).await.unwrap_err();

        assert!(matches!(err, JumpError::UnsupportedRootHop(ref m) if m == "amos"));
        assert!(connector.transports().is_empty());
    }

    #[tokio::test]
    async fn root_hop_opens_transport_and_shell() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());

        let handle = chain.jump(&hop("ssh"), "a", None).await.unwrap();

        assert_eq!(handle.node(), "a");
        let transports = connector.transports();
        assert_eq!(transports.len(), 1);
        assert_eq!(transports[0].host(), "a");
        assert_eq!(transports[0].shells_opened(), 1);
    }

    #[tokio::test]
    async fn refused_root_connection_is_reported() {
        let connector = ScriptedConnector::new(script()).refuse("a");
        let chain = SessionChain::new(&connector, ResponseDetector::default());

        let err = chain.jump(&hop("ssh"), "a", None).await.unwrap_err();

        assert!(matches!(err, JumpError::Connect(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ssh_hop_types_invocation_and_password_into_previous_shell() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());
        let root = chain.jump(&hop("ssh"), "a", None).await.unwrap();

        let mut second = hop("ssh");
        second.port = Some("2222".to_string());
        let next = chain.jump(&second, "b", Some(&root)).await.unwrap();

        assert!(next.shares_shell_with(&root));
        assert_eq!(next.path(), vec!["a", "b"]);
        assert_eq!(
            connector.transcript().lines(),
            vec!["ssh -o 'StrictHostKeyChecking no' ops@b -p 2222", "pw"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_hop_settles_before_reading() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());
        let root = chain.jump(&hop("ssh"), "a", None).await.unwrap();

        let started = Instant::now();
        let next = chain.jump(&hop("amos"), "rbs01", Some(&root)).await.unwrap();

        assert!(started.elapsed() >= VENDOR_SETTLE);
        assert_eq!(next.node(), "rbs01");
        assert_eq!(connector.transcript().lines(), vec!["amos rbs01"]);
        assert!(!next.lock().await.has_pending_data());
    }

    #[tokio::test(start_paused = true)]
    async fn vendor_console_closing_silently_is_a_disconnect() {
        let connector = ScriptedConnector::new(Script::new().close_on("amos "));
        let chain = SessionChain::new(&connector, ResponseDetector::default());
        let root = chain.jump(&hop("ssh"), "a", None).await.unwrap();

        let started = Instant::now();
        let err = chain
            .jump(&hop("amos"), "rbs01", Some(&root))
            .await
            .unwrap_err();

        assert!(matches!(err, JumpError::ChannelDisconnect));
        assert!(started.elapsed() >= VENDOR_SETTLE);
        assert_eq!(connector.transcript().lines(), vec!["amos rbs01"]);
    }

    #[tokio::test]
    async fn unknown_method_is_rejected_after_root() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());
        let root = chain.jump(&hop("ssh"), "a", None).await.unwrap();

        let err = chain
            .jump(&hop("telnet"), "b", Some(&root))
            .await
            .unwrap_err();

        assert!(matches!(err, JumpError::UnsupportedMethod(ref m) if m == "telnet"));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_replays_route_on_new_shell() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());
        let root = chain.jump(&hop("ssh"), "a", None).await.unwrap();
        let b = chain.jump(&hop("ssh"), "b", Some(&root)).await.unwrap();

        let fresh = chain.reset(&b).await.unwrap();

        assert!(!fresh.shares_shell_with(&b));
        assert_eq!(fresh.path(), vec!["a", "b"]);
        assert_eq!(connector.transports()[0].shells_opened(), 2);
        let ssh_lines = connector
            .transcript()
            .lines()
            .into_iter()
            .filter(|l| l.starts_with("ssh "))
            .count();
        assert_eq!(ssh_lines, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_through_vendor_hop_settles_again() {
        let connector = ScriptedConnector::new(script());
        let chain = SessionChain::new(&connector, ResponseDetector::default());
        let root = chain.jump(&hop("ssh"), "a", None).await.unwrap();
        let rbs = chain.jump(&hop("amos"), "rbs01", Some(&root)).await.unwrap();

        let started = Instant::now();
        let fresh = chain.reset(&rbs).await.unwrap();

        assert!(started.elapsed() >= VENDOR_SETTLE);
        assert_eq!(fresh.path(), vec!["a", "rbs01"]);
        assert_eq!(
            connector.transcript().lines(),
            vec!["amos rbs01", "amos rbs01"]
        );
    }
}
