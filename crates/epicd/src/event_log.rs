//! Append-only JSONL event log: one global stream plus one file per
//! ticket. Purely observational; execution state lives in the
//! persisted state file, never here.

use chrono::Utc;
use epic_core::events::Event;
use epic_core::types::EventId;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize event: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlEventLog {
    pub root: PathBuf,
    pub global_file: PathBuf,
    pub ticket_dir: PathBuf,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let global_file = root.join("global.jsonl");
        let ticket_dir = root.join("tickets");
        Self {
            root,
            global_file,
            ticket_dir,
        }
    }

    pub fn ensure_layout(&self) -> Result<(), EventLogError> {
        fs::create_dir_all(&self.root).map_err(|source| EventLogError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        fs::create_dir_all(&self.ticket_dir).map_err(|source| EventLogError::CreateDir {
            path: self.ticket_dir.clone(),
            source,
        })?;
        Ok(())
    }

    pub fn append_global(&self, event: &Event) -> Result<(), EventLogError> {
        append_json_line(&self.global_file, event)
    }

    pub fn append_ticket(&self, event: &Event) -> Result<(), EventLogError> {
        if let Some(ticket_id) = &event.ticket_id {
            let file = self.ticket_log_path(ticket_id.as_ref());
            append_json_line(&file, event)?;
        }
        Ok(())
    }

    pub fn append_both(&self, event: &Event) -> Result<(), EventLogError> {
        self.ensure_layout()?;
        self.append_global(event)?;
        self.append_ticket(event)?;
        Ok(())
    }

    pub fn ticket_log_path(&self, ticket_id: &str) -> PathBuf {
        self.ticket_dir
            .join(format!("{}.jsonl", sanitize_file_stem(ticket_id)))
    }

    pub fn global_log_path(&self) -> &Path {
        self.global_file.as_path()
    }
}

/// Process-unique event id: millisecond timestamp plus a nonce.
pub fn next_event_id() -> EventId {
    static EVENT_NONCE: AtomicU64 = AtomicU64::new(1);
    EventId(format!(
        "E{}-{}",
        Utc::now().timestamp_millis(),
        EVENT_NONCE.fetch_add(1, Ordering::Relaxed)
    ))
}

fn sanitize_file_stem(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        "ticket".to_string()
    } else {
        out
    }
}

fn append_json_line(path: &Path, event: &Event) -> Result<(), EventLogError> {
    let line =
        serde_json::to_string(event).map_err(|source| EventLogError::Serialize { source })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;

    file.write_all(line.as_bytes())
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    file.write_all(b"\n")
        .map_err(|source| EventLogError::Append {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(())
}
