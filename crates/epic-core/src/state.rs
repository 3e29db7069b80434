//! Ticket and epic lifecycle states.
//!
//! Both lifecycles are linear with failure branches; the allowed
//! transitions live in `epicd::state_machine`, not here.

use serde::{Deserialize, Serialize};

/// Ticket lifecycle.
///
/// ```text
/// PENDING → READY → BRANCH_CREATED → IN_PROGRESS → AWAITING_VALIDATION → COMPLETED
/// ```
///
/// `Failed` and `Blocked` are reachable from multiple points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    /// Waiting for dependencies to complete.
    Pending,
    /// All dependencies completed; eligible for branch creation.
    Ready,
    /// Ticket branch created and pushed.
    BranchCreated,
    /// Worker process running.
    InProgress,
    /// Worker returned; claims not yet validated.
    AwaitingValidation,
    /// Validation gate passed; final commit trusted.
    Completed,
    /// A gate failed or the worker failed.
    Failed,
    /// A dependency failed; this ticket can never run.
    Blocked,
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            TicketState::Pending => "PENDING",
            TicketState::Ready => "READY",
            TicketState::BranchCreated => "BRANCH_CREATED",
            TicketState::InProgress => "IN_PROGRESS",
            TicketState::AwaitingValidation => "AWAITING_VALIDATION",
            TicketState::Completed => "COMPLETED",
            TicketState::Failed => "FAILED",
            TicketState::Blocked => "BLOCKED",
        };
        f.write_str(tag)
    }
}

impl TicketState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TicketState::Completed | TicketState::Failed | TicketState::Blocked
        )
    }

    /// Returns true if the ticket currently occupies the single
    /// execution slot (`IN_PROGRESS` or `AWAITING_VALIDATION`).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TicketState::InProgress | TicketState::AwaitingValidation
        )
    }
}

/// Epic lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpicState {
    /// Constructed, not yet executing.
    Initializing,
    /// Phase 1: sequential ticket execution.
    Executing,
    /// Phase 2: collapsing ticket branches into the epic branch.
    Merging,
    /// All completed tickets squash-merged, epic branch pushed.
    Finalized,
    /// Critical failure or merge conflict.
    Failed,
    /// Critical failure with rollback requested; branches deleted.
    RolledBack,
}

impl std::fmt::Display for EpicState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            EpicState::Initializing => "INITIALIZING",
            EpicState::Executing => "EXECUTING",
            EpicState::Merging => "MERGING",
            EpicState::Finalized => "FINALIZED",
            EpicState::Failed => "FAILED",
            EpicState::RolledBack => "ROLLED_BACK",
        };
        f.write_str(tag)
    }
}

impl EpicState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EpicState::Finalized | EpicState::Failed | EpicState::RolledBack
        )
    }
}

/// Worker-reported test suite outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSuiteStatus {
    Passing,
    Failing,
    Skipped,
}

impl TestSuiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestSuiteStatus::Passing => "passing",
            TestSuiteStatus::Failing => "failing",
            TestSuiteStatus::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for TestSuiteStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "passing" => Ok(TestSuiteStatus::Passing),
            "failing" => Ok(TestSuiteStatus::Failing),
            "skipped" => Ok(TestSuiteStatus::Skipped),
            other => Err(format!(
                "invalid test suite status '{other}'. valid values: passing, failing, skipped"
            )),
        }
    }
}

impl std::fmt::Display for TestSuiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
