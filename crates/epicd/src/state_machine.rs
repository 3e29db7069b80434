//! Fixed transition tables for ticket and epic lifecycles.
//!
//! An attempted transition outside the table is a programming error in
//! the orchestrator, never a user-facing failure; gate discipline is
//! supposed to make it unreachable.

use chrono::{DateTime, Utc};
use epic_core::state::{EpicState, TicketState};
use epic_core::types::Ticket;

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid ticket state transition: {from:?} -> {to:?}")]
    InvalidTicketTransition { from: TicketState, to: TicketState },
    #[error("invalid epic state transition: {from:?} -> {to:?}")]
    InvalidEpicTransition { from: EpicState, to: EpicState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketTransition {
    pub from: TicketState,
    pub to: TicketState,
    pub at: DateTime<Utc>,
}

/// Transition a ticket to a new state.
pub fn transition_ticket(
    ticket: &mut Ticket,
    to: TicketState,
    at: DateTime<Utc>,
) -> Result<TicketTransition, StateMachineError> {
    let from = ticket.state;
    if !is_ticket_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidTicketTransition { from, to });
    }

    ticket.state = to;
    Ok(TicketTransition { from, to, at })
}

/// Check if a ticket state transition is in the table.
///
/// ```text
/// Pending → Ready → BranchCreated → InProgress → AwaitingValidation → Completed
/// ```
///
/// `Failed` is reachable from every started state (plus `Pending`, for
/// the operator-driven fail command); `Blocked` from the not-yet-started
/// states; the active states can fall back to `Ready` on crash-resume.
pub fn is_ticket_transition_allowed(from: TicketState, to: TicketState) -> bool {
    use TicketState::*;

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (Pending, Ready)
            | (Pending, Blocked)
            | (Pending, Failed)
            | (Ready, BranchCreated)
            | (Ready, Blocked)
            | (Ready, Failed)
            | (BranchCreated, InProgress)
            | (BranchCreated, Failed)
            | (InProgress, AwaitingValidation)
            | (InProgress, Failed)
            | (InProgress, Ready)
            | (AwaitingValidation, Completed)
            | (AwaitingValidation, Failed)
            | (AwaitingValidation, Ready)
    )
}

/// Check if an epic state transition is in the table.
pub fn is_epic_transition_allowed(from: EpicState, to: EpicState) -> bool {
    use EpicState::*;

    if from == to {
        return true;
    }

    matches!(
        (from, to),
        (Initializing, Executing)
            | (Executing, Merging)
            | (Executing, Failed)
            | (Executing, RolledBack)
            | (Merging, Finalized)
            | (Merging, Failed)
            | (Merging, RolledBack)
    )
}

/// Validate an epic transition without a carrier struct; the executor
/// owns the epic record directly.
pub fn check_epic_transition(from: EpicState, to: EpicState) -> Result<(), StateMachineError> {
    if !is_epic_transition_allowed(from, to) {
        return Err(StateMachineError::InvalidEpicTransition { from, to });
    }
    Ok(())
}
