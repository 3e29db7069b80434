//! Crash-resume reconciliation and critical-failure rollback.
//!
//! Resume policy is destructive but deterministic: a half-finished
//! worker attempt cannot be trusted, so any ticket found active is
//! reset to its base commit (uncommitted changes stashed, partial
//! commits discarded) and re-queued from scratch. Git ground truth
//! always wins over persisted claims; disagreement on a completed
//! ticket is fatal and left for an operator.

use chrono::Utc;
use epic_core::events::{Event, EventKind};
use epic_core::state::TicketState;
use epic_core::types::TicketId;
use epic_git::{ops, GitError};

use crate::event_log::{next_event_id, JsonlEventLog};
use crate::gates::EpicContext;
use crate::state_machine::{transition_ticket, StateMachineError};

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("persisted state disagrees with git: {reason}")]
    StateInconsistency { reason: String },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
}

/// Reconcile loaded state against the repository. Returns the tickets
/// that were reset for re-execution.
pub fn reconcile_on_resume(
    ctx: &mut EpicContext,
    log: &JsonlEventLog,
) -> Result<Vec<TicketId>, RecoveryError> {
    let ids: Vec<TicketId> = ctx.tickets.keys().cloned().collect();
    let mut reset = Vec::new();

    for id in ids {
        let ticket = &ctx.tickets[&id];
        match ticket.state {
            TicketState::Completed => {
                let info = ticket.git_info.as_ref().ok_or_else(|| {
                    RecoveryError::StateInconsistency {
                        reason: format!("completed ticket {id} has no git info"),
                    }
                })?;
                let final_commit = info.final_commit.as_deref().ok_or_else(|| {
                    RecoveryError::StateInconsistency {
                        reason: format!("completed ticket {id} has no final commit"),
                    }
                })?;

                if !ops::branch_exists_local(&ctx.repo, &ctx.git, &info.branch)? {
                    return Err(RecoveryError::StateInconsistency {
                        reason: format!(
                            "branch {} for completed ticket {id} no longer exists",
                            info.branch
                        ),
                    });
                }
                if !ops::commit_exists(&ctx.repo, &ctx.git, final_commit)? {
                    return Err(RecoveryError::StateInconsistency {
                        reason: format!(
                            "final commit {final_commit} for completed ticket {id} no longer exists"
                        ),
                    });
                }
                if !ops::commit_is_ancestor(&ctx.repo, &ctx.git, final_commit, &info.branch)? {
                    return Err(RecoveryError::StateInconsistency {
                        reason: format!(
                            "final commit {final_commit} is no longer on branch {} for ticket {id}",
                            info.branch
                        ),
                    });
                }
            }
            TicketState::InProgress | TicketState::AwaitingValidation => {
                let (branch, base_commit) = match &ticket.git_info {
                    Some(info) => (info.branch.clone(), info.base_commit.clone()),
                    None => {
                        return Err(RecoveryError::StateInconsistency {
                            reason: format!("active ticket {id} has no git info"),
                        })
                    }
                };

                // Uncommitted leftovers are stashed, not deleted.
                if epic_git::has_uncommitted_changes(&ctx.repo, &ctx.git)? {
                    ops::stash_push(&ctx.repo, &ctx.git, &format!("raido orphan {id}"))?;
                }
                ops::create_branch(&ctx.repo, &ctx.git, &branch, &base_commit)?;

                let ticket = ctx
                    .tickets
                    .get_mut(&id)
                    .ok_or_else(|| RecoveryError::StateInconsistency {
                        reason: format!("ticket {id} disappeared during reconciliation"),
                    })?;
                let from = ticket.state;
                transition_ticket(ticket, TicketState::Ready, Utc::now())?;
                ticket.started_at = None;
                ticket.test_suite_status = None;
                ticket.acceptance_criteria.clear();
                ticket.failure_reason = None;
                if let Some(info) = ticket.git_info.as_mut() {
                    info.final_commit = None;
                }

                append_event(
                    log,
                    ctx,
                    Some(id.clone()),
                    EventKind::TicketReset {
                        reason: format!("orphaned {from} ticket reset to READY on resume"),
                    },
                );
                reset.push(id);
            }
            _ => {}
        }
    }

    // Leave the worktree somewhere predictable.
    ops::checkout(&ctx.repo, &ctx.git, &ctx.epic_branch)?;
    Ok(reset)
}

/// Delete every ticket branch created so far and reset the epic branch
/// to its baseline. Individual deletion failures are logged and
/// skipped. Safe to invoke more than once.
pub fn rollback_epic(ctx: &EpicContext, log: &JsonlEventLog) -> Result<(), RecoveryError> {
    append_event(log, ctx, None, EventKind::RollbackStarted);

    for ticket in ctx.tickets.values() {
        let Some(info) = &ticket.git_info else {
            continue;
        };
        match ops::delete_branch(&ctx.repo, &ctx.git, &info.branch, true) {
            Ok(()) => {
                append_event(
                    log,
                    ctx,
                    Some(ticket.id.clone()),
                    EventKind::BranchDeleted {
                        branch: info.branch.clone(),
                    },
                );
            }
            Err(err) => {
                eprintln!(
                    "[epic] rollback: failed to delete branch {}: {err}",
                    info.branch
                );
                append_event(
                    log,
                    ctx,
                    Some(ticket.id.clone()),
                    EventKind::Error {
                        code: "rollback.delete_branch".to_string(),
                        message: err.to_string(),
                    },
                );
            }
        }
    }

    ops::hard_reset_branch(&ctx.repo, &ctx.git, &ctx.epic_branch, &ctx.baseline_commit)?;
    append_event(log, ctx, None, EventKind::RollbackCompleted);
    Ok(())
}

fn append_event(
    log: &JsonlEventLog,
    ctx: &EpicContext,
    ticket_id: Option<TicketId>,
    kind: EventKind,
) {
    let event = Event {
        id: next_event_id(),
        ticket_id,
        epic_id: Some(ctx.epic_id.clone()),
        at: Utc::now(),
        kind,
    };
    if let Err(err) = log.append_both(&event) {
        eprintln!("[epic] failed to append event: {err}");
    }
}
