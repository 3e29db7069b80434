//! Core records for the epic controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::state::{TestSuiteStatus, TicketState};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl TicketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TicketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TicketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpicId(pub String);

impl std::fmt::Display for EpicId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EpicId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Git coordinates of a ticket branch.
///
/// `final_commit` stays `None` until the worker reports one; a
/// `COMPLETED` ticket always has it set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub branch: String,
    pub base_commit: String,
    pub final_commit: Option<String>,
}

/// One acceptance criterion with the worker's claim of whether it was met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCriterion {
    pub criterion: String,
    pub met: bool,
}

/// One unit of worker-delegated code change, tracked through a fixed
/// lifecycle. Owned exclusively by the orchestrator; mutated only
/// through validated transitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    /// Where the ticket's instructions live.
    pub path: PathBuf,
    pub title: String,
    #[serde(default)]
    pub depends_on: Vec<TicketId>,
    #[serde(default)]
    pub critical: bool,
    pub state: TicketState,
    pub git_info: Option<GitInfo>,
    pub test_suite_status: Option<TestSuiteStatus>,
    #[serde(default)]
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub failure_reason: Option<String>,
    pub blocking_dependency: Option<TicketId>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Create a new ticket in Pending state.
    pub fn new(id: TicketId, path: PathBuf, title: String) -> Self {
        Self {
            id,
            path,
            title,
            depends_on: Vec::new(),
            critical: false,
            state: TicketState::Pending,
            git_info: None,
            test_suite_status: None,
            acceptance_criteria: Vec::new(),
            failure_reason: None,
            blocking_dependency: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Add explicit dependency.
    pub fn with_dependency(mut self, dep: TicketId) -> Self {
        self.depends_on.push(dep);
        self
    }

    /// Mark the ticket critical.
    pub fn with_critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Branch name for this ticket.
    pub fn branch_name(&self) -> String {
        format!("ticket/{}", self.id)
    }

    /// Check if every explicit dependency is completed.
    pub fn dependencies_completed(&self, tickets: &BTreeMap<TicketId, Ticket>) -> bool {
        self.depends_on.iter().all(|dep_id| {
            tickets
                .get(dep_id)
                .map(|t| t.state == TicketState::Completed)
                .unwrap_or(false)
        })
    }

    /// First dependency that is not completed, if any.
    pub fn first_unmet_dependency(
        &self,
        tickets: &BTreeMap<TicketId, Ticket>,
    ) -> Option<TicketId> {
        self.depends_on
            .iter()
            .find(|dep_id| {
                tickets
                    .get(dep_id)
                    .map(|t| t.state != TicketState::Completed)
                    .unwrap_or(true)
            })
            .cloned()
    }
}

/// Outcome of a transition gate. Ephemeral: logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateResult {
    pub passed: bool,
    pub reason: String,
    pub metadata: BTreeMap<String, String>,
}

impl GateResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn pass_with_metadata(metadata: BTreeMap<String, String>) -> Self {
        Self {
            passed: true,
            reason: String::new(),
            metadata,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// What the worker claims to have done. Consumed once by the
/// orchestrator's completion handling; the validation gate decides
/// whether the claims are trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderResult {
    pub success: bool,
    pub final_commit: Option<String>,
    pub test_status: Option<TestSuiteStatus>,
    pub acceptance_criteria: Vec<AcceptanceCriterion>,
    pub error: Option<String>,
    /// Raw worker output, captured for diagnostics.
    pub raw_output: String,
}

impl BuilderResult {
    /// A failure result carrying a reason and whatever output was seen.
    pub fn failure(error: impl Into<String>, raw_output: impl Into<String>) -> Self {
        Self {
            success: false,
            final_commit: None,
            test_status: None,
            acceptance_criteria: Vec::new(),
            error: Some(error.into()),
            raw_output: raw_output.into(),
        }
    }
}
