//! Command files: one command per line, `#` comments, blank lines ignored.

use std::path::Path;

use crate::config::remove_comment;
use crate::error::JumpError;

/// Ordered commands to run on one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandList {
    commands: Vec<String>,
}

impl CommandList {
    pub fn parse(text: &str) -> Self {
        let commands = text
            .lines()
            .map(|line| remove_comment(line, "#").trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        Self { commands }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, JumpError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| JumpError::CommandFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::parse(&text))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CommandList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().map(Into::into).collect(),
        }
    }
}
