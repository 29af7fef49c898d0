//! Jumpbox configuration file loading.
//!
//! The file is line oriented: `key = value` pairs accumulate into a block and
//! the literal key `end` closes it. `nodes` and `cmd_files` close the block
//! they appear in immediately, which lets one physical block describe the
//! fan-out stage (a node list, a command-file list and the jumpbox used to
//! reach them).
//!
//! ```text
//! jump_cmd = ssh
//! node = 10.0.0.1
//! username = admin
//! cmd_file = bastion.txt
//! end
//! nodes = rbs01, rbs02
//! cmd_files = rbs.txt
//! jump_cmd = amos
//! end
//! ```

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::error::JumpError;

/// Port used when a block has no `port` key.
pub const DEFAULT_PORT: u16 = 22;
/// Default pause between commands, in seconds.
pub const DEFAULT_DELAY: &str = "0";
/// Default output silence that completes a command in idle mode, in seconds.
pub const DEFAULT_CMD_TIMEOUT: &str = "0.5";
/// Default prompt terminator characters.
pub const DEFAULT_PROMPTS: &str = "$#?<>";

/// How a hop is reached from the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JumpMethod {
    /// `ssh`: a real connection for the root hop, a typed `ssh` invocation later.
    SecureShell,
    /// A vendor console launched with the node as argument (any `jump_cmd`
    /// containing `mos`, e.g. `amos` or `moshell`).
    VendorTool(String),
    /// Anything else. Rejected when jumping.
    Other(String),
}

impl JumpMethod {
    pub fn from_jump_cmd(jump_cmd: &str) -> Self {
        let lowered = jump_cmd.trim().to_lowercase();
        if lowered == "ssh" {
            JumpMethod::SecureShell
        } else if lowered.contains("mos") {
            JumpMethod::VendorTool(jump_cmd.trim().to_string())
        } else {
            JumpMethod::Other(jump_cmd.trim().to_string())
        }
    }
}

impl fmt::Display for JumpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpMethod::SecureShell => f.write_str("ssh"),
            JumpMethod::VendorTool(cmd) | JumpMethod::Other(cmd) => f.write_str(cmd),
        }
    }
}

/// One configuration block.
///
/// A block is either a single-node hop (`node` set) used by the chain, or a
/// piece of the fan-out stage (`nodes`, `cmd_files`, or the jumpbox that
/// reaches them). Numeric fields are kept as written and parsed when a hop
/// or command runner is built, so a bad value can be reported and replaced
/// by its default at that point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Jumpbox {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<String>,
}

impl Jumpbox {
    /// True for blocks that name exactly one `node`.
    pub fn is_single_node(&self) -> bool {
        self.node.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// The access method, `Other("")` when `jump_cmd` is missing.
    pub fn method(&self) -> JumpMethod {
        JumpMethod::from_jump_cmd(self.jump_cmd.as_deref().unwrap_or_default())
    }

    pub fn port(&self) -> Result<u16, JumpError> {
        match non_empty(&self.port) {
            None => Ok(DEFAULT_PORT),
            Some(raw) => raw.trim().parse().map_err(|_| JumpError::ConfigValue {
                field: "port",
                value: raw.to_string(),
            }),
        }
    }

    /// Pause between two commands.
    pub fn delay(&self) -> Result<Duration, JumpError> {
        parse_seconds("delay", non_empty(&self.delay).unwrap_or(DEFAULT_DELAY))
    }

    /// Output silence that marks a command as finished in idle mode.
    pub fn cmd_timeout(&self) -> Result<Duration, JumpError> {
        parse_seconds(
            "cmd_timeout",
            non_empty(&self.cmd_timeout).unwrap_or(DEFAULT_CMD_TIMEOUT),
        )
    }

    /// [`delay`](Self::delay), or zero with a warning when it is malformed.
    pub fn delay_or_default(&self) -> Duration {
        self.delay().unwrap_or_else(|err| {
            warn!("{err}, using {DEFAULT_DELAY} seconds instead");
            Duration::ZERO
        })
    }

    /// [`cmd_timeout`](Self::cmd_timeout), or half a second with a warning
    /// when it is malformed.
    pub fn cmd_timeout_or_default(&self) -> Duration {
        self.cmd_timeout().unwrap_or_else(|err| {
            warn!("{err}, using {DEFAULT_CMD_TIMEOUT} seconds instead");
            Duration::from_millis(500)
        })
    }

    pub fn prompts(&self) -> &str {
        non_empty(&self.prompts).unwrap_or(DEFAULT_PROMPTS)
    }

    fn is_empty(&self) -> bool {
        *self == Jumpbox::default()
    }
}

impl fmt::Display for Jumpbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scalars = [
            ("jump_cmd", &self.jump_cmd),
            ("node", &self.node),
            ("cmd_file", &self.cmd_file),
            ("log_file", &self.log_file),
            ("username", &self.username),
            ("port", &self.port),
            ("delay", &self.delay),
            ("cmd_timeout", &self.cmd_timeout),
            ("prompts", &self.prompts),
        ];
        for (key, value) in scalars {
            if let Some(value) = value {
                writeln!(f, "{key}:\t{value}")?;
            }
        }
        if self.password.is_some() {
            writeln!(f, "password:\t********")?;
        }
        for (key, values) in [("nodes", &self.nodes), ("cmd_files", &self.cmd_files)] {
            if let Some(values) = values {
                writeln!(f, "{key}:\t{}", values.join(", "))?;
            }
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn parse_seconds(field: &'static str, raw: &str) -> Result<Duration, JumpError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| JumpError::ConfigValue {
            field,
            value: raw.to_string(),
        })
}

/// Values written into a closed block when it does not set them itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub delay: String,
    pub cmd_timeout: String,
    pub prompts: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY.to_string(),
            cmd_timeout: DEFAULT_CMD_TIMEOUT.to_string(),
            prompts: DEFAULT_PROMPTS.to_string(),
        }
    }
}

/// Returns `line` without its trailing comment.
///
/// `password` lines are returned untouched since a password may contain the
/// marker. On `prompts` lines the first marker is kept as part of the prompt
/// set and only commentary after a later marker is removed.
pub fn remove_comment<'a>(line: &'a str, comment: &str) -> Cow<'a, str> {
    if comment.is_empty() {
        return Cow::Borrowed(line);
    }
    let Some(index) = line.find(comment) else {
        return Cow::Borrowed(line);
    };
    let lowered = line.trim().to_lowercase();
    if lowered.starts_with("password") {
        return Cow::Borrowed(line);
    }
    if lowered.starts_with("prompts") {
        let split = index + comment.len();
        let head = line[..split].trim();
        let tail = remove_comment(line[split..].trim(), comment);
        return Cow::Owned(format!("{head}{tail}"));
    }
    Cow::Borrowed(line[..index].trim())
}

/// Parser for jumpbox configuration files.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    separator: String,
    comment: String,
    multi_value_separator: String,
    defaults: Defaults,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            separator: "=".to_string(),
            comment: "#".to_string(),
            multi_value_separator: ",".to_string(),
            defaults: Defaults::default(),
        }
    }
}

impl ConfigLoader {
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_multi_value_separator(mut self, separator: impl Into<String>) -> Self {
        self.multi_value_separator = separator.into();
        self
    }

    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Reads and parses a configuration file.
    pub async fn load_file(&self, path: impl AsRef<Path>) -> Result<Vec<Jumpbox>, JumpError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| JumpError::ConfigFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(self.load_str(&text))
    }

    /// Parses configuration text into the ordered list of blocks.
    pub fn load_str(&self, text: &str) -> Vec<Jumpbox> {
        let mut blocks = Vec::new();
        let mut current = Jumpbox::default();

        for (lineno, raw) in text.lines().enumerate() {
            let line = remove_comment(raw, &self.comment);
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = match line.split_once(self.separator.as_str()) {
                Some((key, value)) => (key.trim().to_lowercase(), Some(value)),
                None => (line.trim().to_lowercase(), None),
            };

            if key == "end" {
                self.backfill(&mut current);
                blocks.push(std::mem::take(&mut current));
                continue;
            }
            let Some(value) = value else {
                debug!("line {}: no '{}' separator, skipped", lineno + 1, self.separator);
                continue;
            };

            match key.as_str() {
                "nodes" | "cmd_files" => {
                    let values = self.split_values(value);
                    if key == "nodes" {
                        current.nodes = Some(values);
                    } else {
                        current.cmd_files = Some(values);
                    }
                    blocks.push(std::mem::take(&mut current));
                }
                _ => self.set_scalar(&mut current, &key, value, lineno + 1),
            }
        }

        if !current.is_empty() {
            warn!("configuration ends inside a block without 'end', block discarded");
        }
        blocks
    }

    fn split_values(&self, value: &str) -> Vec<String> {
        if self.multi_value_separator.is_empty() {
            return vec![value.trim().to_string()];
        }
        value
            .split(self.multi_value_separator.as_str())
            .map(|v| v.trim().to_string())
            .collect()
    }

    fn set_scalar(&self, block: &mut Jumpbox, key: &str, value: &str, lineno: usize) {
        let value = value.trim().to_string();
        let listable = key != "password" && key != "prompts";
        if listable
            && !self.multi_value_separator.is_empty()
            && value.contains(self.multi_value_separator.as_str())
        {
            warn!(
                "line {lineno}: {}",
                JumpError::ConfigStructure(format!("'{key}' takes a single value, got '{value}'"))
            );
        }

        let slot = match key {
            "jump_cmd" => &mut block.jump_cmd,
            "node" => &mut block.node,
            "cmd_file" => &mut block.cmd_file,
            "log_file" => &mut block.log_file,
            "username" => &mut block.username,
            "password" => &mut block.password,
            "port" => &mut block.port,
            "delay" => &mut block.delay,
            "cmd_timeout" => &mut block.cmd_timeout,
            "prompts" => &mut block.prompts,
            other => {
                debug!("line {lineno}: unknown key '{other}' ignored");
                return;
            }
        };
        *slot = Some(value);
    }

    fn backfill(&self, block: &mut Jumpbox) {
        if non_empty(&block.delay).is_none() {
            block.delay = Some(self.defaults.delay.clone());
        }
        if non_empty(&block.cmd_timeout).is_none() {
            block.cmd_timeout = Some(self.defaults.cmd_timeout.clone());
        }
        if non_empty(&block.prompts).is_none() {
            block.prompts = Some(self.defaults.prompts.clone());
        }
    }
}
