//! The fan-out stage: one jumpbox, many nodes, a command file per node.

use log::{debug, warn};

use crate::config::Jumpbox;
use crate::error::JumpError;

/// The entries left in the queue once its head no longer names a single
/// node, sorted into their roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutPlan {
    pub jumpbox: Jumpbox,
    pub nodes: Vec<String>,
    pub cmd_files: Vec<String>,
}

impl FanOutPlan {
    /// Takes the first entry with a `nodes` list and the first with a
    /// `cmd_files` list out of `entries`; the first remaining entry is the
    /// jumpbox that reaches the nodes.
    ///
    /// Returns `None` when there is no node list at all.
    pub fn assemble(mut entries: Vec<Jumpbox>) -> Result<Option<Self>, JumpError> {
        let Some(nodes) = take_list(&mut entries, |e| &mut e.nodes) else {
            if !entries.is_empty() {
                warn!("{} configuration blocks without a node list, nothing to fan out to", entries.len());
            }
            return Ok(None);
        };
        let cmd_files = take_list(&mut entries, |e| &mut e.cmd_files).ok_or_else(|| {
            JumpError::ConfigStructure("nodes are listed but no cmd_files block was found".to_string())
        })?;
        if entries.is_empty() {
            return Err(JumpError::EmptyJumpbox);
        }
        let jumpbox = entries.swap_remove(0);
        if !entries.is_empty() {
            debug!("ignoring {} extra fan-out blocks", entries.len());
        }
        Ok(Some(Self {
            jumpbox,
            nodes,
            cmd_files,
        }))
    }

    /// Each node paired with its command file, in node order.
    pub fn assignments(&self) -> impl Iterator<Item = (&str, &str)> {
        let count = self.nodes.len();
        self.nodes.iter().enumerate().map(move |(i, node)| {
            (node.as_str(), assign_command_file(i, count, &self.cmd_files))
        })
    }
}

/// Command file for node `index` out of `node_count`.
///
/// Positional when the counts match or `index` has a file of its own. With
/// fewer files than nodes the last file is reused for the rest. Any other
/// case falls back to the file at `node_count - 1`.
pub fn assign_command_file(index: usize, node_count: usize, files: &[String]) -> &str {
    let pick = if files.len() == node_count || index < files.len() {
        index
    } else if files.len() < node_count {
        files.len().saturating_sub(1)
    } else {
        node_count.saturating_sub(1)
    };
    files.get(pick).map(String::as_str).unwrap_or_default()
}

fn take_list(
    entries: &mut Vec<Jumpbox>,
    field: impl Fn(&mut Jumpbox) -> &mut Option<Vec<String>>,
) -> Option<Vec<String>> {
    let index = entries
        .iter_mut()
        .position(|e| field(e).as_ref().is_some_and(|v| !v.is_empty()))?;
    let mut entry = entries.remove(index);
    field(&mut entry).take()
}
