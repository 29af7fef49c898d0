//! Run-level audit trail.
//!
//! Every hop writes `Accessing X` when it is entered, `Executing commands on X`
//! before its command file runs and `Leaving X` once it is done. The lines go
//! to the audit file as they happen; the same events are kept in memory with
//! a timestamp so callers and tests can inspect them after the run.

use std::fmt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::JumpError;

/// Something that happened to a hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    Accessing { node: String },
    Executing { node: String },
    Leaving { node: String },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::Accessing { node } => write!(f, "Accessing {node}"),
            AuditEvent::Executing { node } => write!(f, "Executing commands on {node}"),
            AuditEvent::Leaving { node } => write!(f, "Leaving {node}"),
        }
    }
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts_ms: u128,
    pub event: AuditEvent,
}

/// Audit file plus in-memory copy of its events.
#[derive(Debug, Default)]
pub struct AuditLog {
    sink: Option<File>,
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    /// Truncates `path` and writes events to it.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, JumpError> {
        let path = path.as_ref();
        let sink = File::create(path)
            .await
            .map_err(|source| JumpError::LogFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            sink: Some(sink),
            entries: Vec::new(),
        })
    }

    /// A log that only keeps events in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub async fn record(&mut self, event: AuditEvent) -> Result<(), JumpError> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(format!("{event}\n").as_bytes()).await?;
        }
        self.entries.push(AuditEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    /// The recorded events as they appear in the audit file.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.event.to_string()).collect()
    }

    /// Flushes and closes the audit file.
    pub async fn close(&mut self) -> Result<(), JumpError> {
        if let Some(mut sink) = self.sink.take() {
            sink.flush().await?;
            sink.shutdown().await?;
        }
        Ok(())
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_render_as_audit_lines() {
        let node = || "b".to_string();
        assert_eq!(AuditEvent::Accessing { node: node() }.to_string(), "Accessing b");
        assert_eq!(
            AuditEvent::Executing { node: node() }.to_string(),
            "Executing commands on b"
        );
        assert_eq!(AuditEvent::Leaving { node: node() }.to_string(), "Leaving b");
    }

    #[test]
    fn entries_serialize_with_kind_tag() {
        let entry = AuditEntry {
            ts_ms: 1,
            event: AuditEvent::Leaving { node: "a".to_string() },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"ts_ms":1,"event":{"kind":"leaving","node":"a"}}"#);
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[tokio::test]
    async fn file_receives_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boxjumper.log");
        let mut log = AuditLog::create(&path).await.unwrap();

        log.record(AuditEvent::Accessing { node: "a".into() }).await.unwrap();
        log.record(AuditEvent::Leaving { node: "a".into() }).await.unwrap();
        log.close().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Accessing a\nLeaving a\n");
        assert_eq!(log.lines(), vec!["Accessing a", "Leaving a"]);
    }
}
