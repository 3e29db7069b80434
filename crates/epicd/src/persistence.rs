//! Atomic load/save of the execution state file.
//!
//! Save serializes the full epic + ticket record set, writes a
//! temporary file, then renames it over the canonical path, so a
//! reader never observes a half-written file. Load rejects unknown
//! schema versions outright and runs the consistency checks before
//! any execution resumes.

use chrono::{DateTime, Utc};
use epic_core::state::{EpicState, TicketState};
use epic_core::types::{EpicId, Ticket, TicketId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::topological_order;

pub const STATE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read state file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize state: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse state file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file schema version {found} is not supported (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },
    #[error("state file is inconsistent: {reason}")]
    Inconsistent { reason: String },
}

/// The persisted record: one per epic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpicStateFile {
    pub schema_version: u32,
    pub epic_id: EpicId,
    pub epic_branch: String,
    pub baseline_commit: String,
    pub state: EpicState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub tickets: BTreeMap<TicketId, Ticket>,
}

/// Atomically write the state file (temp file, then rename).
pub fn save_state(path: &Path, state: &EpicStateFile) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let mut buf = serde_json::to_string_pretty(state)
        .map_err(|source| PersistenceError::Serialize { source })?;
    buf.push('\n');

    let tmp = tmp_path(path);
    fs::write(&tmp, &buf).map_err(|source| PersistenceError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Load and validate the state file.
pub fn load_state(path: &Path) -> Result<EpicStateFile, PersistenceError> {
    let content = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    // Check the version before the full parse so a future schema does
    // not surface as a confusing shape mismatch.
    #[derive(Deserialize)]
    struct SchemaProbe {
        schema_version: u32,
    }
    let probe: SchemaProbe =
        serde_json::from_str(&content).map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if probe.schema_version != STATE_SCHEMA_VERSION {
        return Err(PersistenceError::SchemaVersion {
            found: probe.schema_version,
            expected: STATE_SCHEMA_VERSION,
        });
    }

    let state: EpicStateFile =
        serde_json::from_str(&content).map_err(|source| PersistenceError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    check_consistency(&state)?;
    Ok(state)
}

/// The invariants every persisted snapshot must satisfy.
pub fn check_consistency(state: &EpicStateFile) -> Result<(), PersistenceError> {
    let active: Vec<&TicketId> = state
        .tickets
        .values()
        .filter(|t| t.state.is_active())
        .map(|t| &t.id)
        .collect();
    if active.len() > 1 {
        return Err(PersistenceError::Inconsistent {
            reason: format!("more than one active ticket: {active:?}"),
        });
    }

    for ticket in state.tickets.values() {
        for dep in &ticket.depends_on {
            if !state.tickets.contains_key(dep) {
                return Err(PersistenceError::Inconsistent {
                    reason: format!("ticket {} depends on unknown ticket {dep}", ticket.id),
                });
            }
        }
    }

    if topological_order(&state.tickets, |_| true).len() != state.tickets.len() {
        return Err(PersistenceError::Inconsistent {
            reason: "ticket dependency graph has a cycle".to_string(),
        });
    }

    for ticket in state.tickets.values() {
        if ticket.state == TicketState::Completed {
            let has_final = ticket
                .git_info
                .as_ref()
                .and_then(|info| info.final_commit.as_ref())
                .is_some();
            if !has_final {
                return Err(PersistenceError::Inconsistent {
                    reason: format!("completed ticket {} has no final commit", ticket.id),
                });
            }
        }

        if !ticket.state.is_terminal() {
            for dep in &ticket.depends_on {
                let dep_state = state.tickets[dep].state;
                if matches!(dep_state, TicketState::Failed | TicketState::Blocked) {
                    return Err(PersistenceError::Inconsistent {
                        reason: format!(
                            "ticket {} must be BLOCKED: dependency {dep} is {dep_state}",
                            ticket.id
                        ),
                    });
                }
            }
        }
    }

    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        check_consistency, load_state, save_state, EpicStateFile, PersistenceError,
        STATE_SCHEMA_VERSION,
    };
    use chrono::Utc;
    use epic_core::state::{EpicState, TestSuiteStatus, TicketState};
    use epic_core::types::{AcceptanceCriterion, EpicId, GitInfo, Ticket, TicketId};
    use std::path::PathBuf;

    fn mk_ticket(id: &str, state: TicketState, depends_on: &[&str]) -> Ticket {
        let mut ticket = Ticket::new(
            TicketId::new(id),
            PathBuf::from(format!("tickets/{id}.md")),
            format!("Ticket {id}"),
        );
        ticket.state = state;
        ticket.depends_on = depends_on.iter().map(|d| TicketId::new(*d)).collect();
        if state == TicketState::Completed {
            ticket.git_info = Some(GitInfo {
                branch: format!("ticket/{id}"),
                base_commit: "base".to_string(),
                final_commit: Some("final".to_string()),
            });
        }
        ticket
    }

    fn mk_state(tickets: Vec<Ticket>) -> EpicStateFile {
        EpicStateFile {
            schema_version: STATE_SCHEMA_VERSION,
            epic_id: EpicId("epic-test".to_string()),
            epic_branch: "epic/test".to_string(),
            baseline_commit: "abc123".to_string(),
            state: EpicState::Executing,
            started_at: Some(Utc::now()),
            completed_at: None,
            failure_reason: None,
            tickets: tickets.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut ticket = mk_ticket("T1", TicketState::Completed, &[]);
        ticket.critical = true;
        ticket.test_suite_status = Some(TestSuiteStatus::Passing);
        ticket.acceptance_criteria = vec![AcceptanceCriterion {
            criterion: "works".to_string(),
            met: true,
        }];
        ticket.started_at = Some(Utc::now());
        ticket.completed_at = Some(Utc::now());
        let state = mk_state(vec![ticket, mk_ticket("T2", TicketState::Pending, &["T1"])]);

        save_state(&path, &state).expect("save");
        let loaded = load_state(&path).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn load_save_load_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let state = mk_state(vec![
            mk_ticket("T1", TicketState::Completed, &[]),
            mk_ticket("T2", TicketState::Pending, &["T1"]),
        ]);
        save_state(&path, &state).expect("save");

        let first = load_state(&path).expect("first load");
        save_state(&path, &first).expect("re-save");
        let second = load_state(&path).expect("second load");
        assert_eq!(first, second);
    }

    #[test]
    fn save_leaves_no_temp_file_and_creates_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");

        save_state(&path, &mk_state(vec![])).expect("save");
        assert!(path.exists());
        assert!(!path.with_file_name("state.json.tmp").exists());
    }

    #[test]
    fn unknown_schema_version_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");

        let mut state = mk_state(vec![]);
        state.schema_version = 2;
        save_state(&path, &state).expect("save");

        let err = load_state(&path).expect_err("schema mismatch must fail");
        assert!(matches!(
            err,
            PersistenceError::SchemaVersion {
                found: 2,
                expected: STATE_SCHEMA_VERSION,
            }
        ));
    }

    #[test]
    fn malformed_state_file_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").expect("write");

        let err = load_state(&path).expect_err("parse must fail");
        assert!(matches!(err, PersistenceError::Parse { .. }));
    }

    #[test]
    fn two_active_tickets_are_inconsistent() {
        let state = mk_state(vec![
            mk_ticket("T1", TicketState::InProgress, &[]),
            mk_ticket("T2", TicketState::AwaitingValidation, &[]),
        ]);
        let err = check_consistency(&state).expect_err("must fail");
        assert!(matches!(err, PersistenceError::Inconsistent { reason } if reason.contains("active")));
    }

    #[test]
    fn completed_ticket_without_final_commit_is_inconsistent() {
        let mut ticket = mk_ticket("T1", TicketState::Completed, &[]);
        ticket.git_info = None;
        let state = mk_state(vec![ticket]);

        let err = check_consistency(&state).expect_err("must fail");
        assert!(matches!(err, PersistenceError::Inconsistent { reason } if reason.contains("final commit")));
    }

    #[test]
    fn unblocked_dependent_of_failed_ticket_is_inconsistent() {
        let state = mk_state(vec![
            mk_ticket("T1", TicketState::Failed, &[]),
            mk_ticket("T2", TicketState::Pending, &["T1"]),
        ]);
        let err = check_consistency(&state).expect_err("must fail");
        assert!(matches!(err, PersistenceError::Inconsistent { reason } if reason.contains("must be BLOCKED")));

        let state = mk_state(vec![
            mk_ticket("T1", TicketState::Failed, &[]),
            mk_ticket("T2", TicketState::Blocked, &["T1"]),
        ]);
        check_consistency(&state).expect("blocked dependent is fine");
    }

    #[test]
    fn unknown_dependency_and_cycle_are_inconsistent() {
        let state = mk_state(vec![mk_ticket("T1", TicketState::Pending, &["T9"])]);
        let err = check_consistency(&state).expect_err("unknown dep must fail");
        assert!(matches!(err, PersistenceError::Inconsistent { reason } if reason.contains("unknown")));

        let state = mk_state(vec![
            mk_ticket("T1", TicketState::Pending, &["T2"]),
            mk_ticket("T2", TicketState::Pending, &["T1"]),
        ]);
        let err = check_consistency(&state).expect_err("cycle must fail");
        assert!(matches!(err, PersistenceError::Inconsistent { reason } if reason.contains("cycle")));
    }
}
