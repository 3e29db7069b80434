//! The epic state machine.
//!
//! Only component with a public entry point. Phase 1 executes tickets
//! sequentially behind the gates; phase 2 collapses completed ticket
//! branches into the epic branch. Every transition is validated
//! against the fixed tables and persisted before the next
//! state-dependent decision is made.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use epic_builder::{BuildRequest, TicketBuilder};
use epic_core::config::{ticket_from_spec, EpicConfig};
use epic_core::events::{Event, EventKind};
use epic_core::state::{EpicState, TestSuiteStatus, TicketState};
use epic_core::types::{BuilderResult, GateResult, GitInfo, Ticket, TicketId};
use epic_git::{head_sha, ops, GitCli, GitError, RepoHandle};

use crate::event_log::{next_event_id, JsonlEventLog};
use crate::gates::{
    BuilderStartGate, CreateBranchGate, DependenciesMetGate, EpicContext, Gate, ValidationGate,
};
use crate::persistence::{
    load_state, save_state, EpicStateFile, PersistenceError, STATE_SCHEMA_VERSION,
};
use crate::recovery::{reconcile_on_resume, rollback_epic, RecoveryError};
use crate::scheduler::{eligible_for_ready, next_ready, topological_order, transitive_dependents};
use crate::state_machine::{check_epic_transition, transition_ticket, StateMachineError};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    StateMachine(#[from] StateMachineError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("no runnable ticket but non-terminal tickets remain: {remaining:?}")]
    Stalled { remaining: Vec<TicketId> },
    #[error("ticket {id} is not part of this epic")]
    UnknownTicket { id: TicketId },
    #[error("{message}")]
    Command { message: String },
}

pub struct EpicStateMachine {
    ctx: EpicContext,
    state: EpicState,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    state_path: PathBuf,
    epic_path: PathBuf,
    builder_timeout_secs: u64,
    builder: Box<dyn TicketBuilder>,
    log: JsonlEventLog,
}

impl EpicStateMachine {
    /// Start a fresh epic: ensure the epic branch exists and is checked
    /// out, record its head as the baseline commit, and persist the
    /// initial snapshot.
    pub fn new_epic(
        config: &EpicConfig,
        epic_path: &Path,
        repo: RepoHandle,
        git: GitCli,
        state_path: &Path,
        builder: Box<dyn TicketBuilder>,
        log: JsonlEventLog,
    ) -> Result<Self, ExecutorError> {
        if !ops::branch_exists_local(&repo, &git, &config.epic_branch)? {
            let head = head_sha(&repo, &git)?;
            ops::create_branch(&repo, &git, &config.epic_branch, &head)?;
        }
        ops::checkout(&repo, &git, &config.epic_branch)?;
        let baseline_commit = head_sha(&repo, &git)?;

        let tickets: BTreeMap<TicketId, Ticket> = config
            .tickets
            .iter()
            .map(|spec| {
                let ticket = ticket_from_spec(spec);
                (ticket.id.clone(), ticket)
            })
            .collect();

        let machine = Self {
            ctx: EpicContext {
                epic_id: config.epic_id.clone(),
                epic_branch: config.epic_branch.clone(),
                baseline_commit,
                tickets,
                rollback_on_failure: config.rollback_on_failure,
                git,
                repo,
            },
            state: EpicState::Initializing,
            started_at: None,
            completed_at: None,
            failure_reason: None,
            state_path: state_path.to_path_buf(),
            epic_path: epic_path.to_path_buf(),
            builder_timeout_secs: config.builder.timeout_secs,
            builder,
            log,
        };
        machine.persist()?;
        Ok(machine)
    }

    /// Rebuild from a persisted snapshot, then reconcile it against
    /// git ground truth before anything executes.
    pub fn resume(
        config: &EpicConfig,
        epic_path: &Path,
        repo: RepoHandle,
        git: GitCli,
        state_path: &Path,
        builder: Box<dyn TicketBuilder>,
        log: JsonlEventLog,
    ) -> Result<Self, ExecutorError> {
        let loaded = load_state(state_path)?;
        if loaded.epic_id != config.epic_id {
            return Err(PersistenceError::Inconsistent {
                reason: format!(
                    "state file belongs to epic {}, not {}",
                    loaded.epic_id, config.epic_id
                ),
            }
            .into());
        }

        let mut machine = Self {
            ctx: EpicContext {
                epic_id: loaded.epic_id,
                epic_branch: loaded.epic_branch,
                baseline_commit: loaded.baseline_commit,
                tickets: loaded.tickets,
                rollback_on_failure: config.rollback_on_failure,
                git,
                repo,
            },
            state: loaded.state,
            started_at: loaded.started_at,
            completed_at: loaded.completed_at,
            failure_reason: loaded.failure_reason,
            state_path: state_path.to_path_buf(),
            epic_path: epic_path.to_path_buf(),
            builder_timeout_secs: config.builder.timeout_secs,
            builder,
            log,
        };

        if !machine.state.is_terminal() {
            let reset = reconcile_on_resume(&mut machine.ctx, &machine.log)?;
            if !reset.is_empty() {
                eprintln!(
                    "[epic] resume: reset {} orphaned ticket(s): {reset:?}",
                    reset.len()
                );
            }
            machine.persist()?;
        }
        Ok(machine)
    }

    pub fn epic_state(&self) -> EpicState {
        self.state
    }

    pub fn context(&self) -> &EpicContext {
        &self.ctx
    }

    /// The record that gets persisted; also the status-query payload.
    pub fn snapshot(&self) -> EpicStateFile {
        EpicStateFile {
            schema_version: STATE_SCHEMA_VERSION,
            epic_id: self.ctx.epic_id.clone(),
            epic_branch: self.ctx.epic_branch.clone(),
            baseline_commit: self.ctx.baseline_commit.clone(),
            state: self.state,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failure_reason: self.failure_reason.clone(),
            tickets: self.ctx.tickets.clone(),
        }
    }

    /// Run the epic to a terminal state: phase 1, then collapse.
    pub fn execute(&mut self) -> Result<EpicState, ExecutorError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        if self.state == EpicState::Initializing {
            self.set_epic_state(EpicState::Executing)?;
        }
        if self.state == EpicState::Executing {
            self.run_phase_one()?;
        }
        if !self.state.is_terminal() {
            self.finalize()?;
        }
        Ok(self.state)
    }

    fn run_phase_one(&mut self) -> Result<(), ExecutorError> {
        while self.state == EpicState::Executing {
            self.promote_ready()?;
            let Some(id) = next_ready(&self.ctx.tickets) else {
                break;
            };
            self.run_one_ticket(&id)?;
        }
        Ok(())
    }

    fn promote_ready(&mut self) -> Result<(), ExecutorError> {
        for id in eligible_for_ready(&self.ctx.tickets) {
            let result = {
                let ticket = &self.ctx.tickets[&id];
                DependenciesMetGate.check(ticket, &self.ctx)
            };
            self.log_gate(&id, DependenciesMetGate.name(), &result);
            if result.passed {
                self.set_ticket_state(&id, TicketState::Ready)?;
            }
        }
        Ok(())
    }

    fn run_one_ticket(&mut self, id: &TicketId) -> Result<(), ExecutorError> {
        let Some((branch, base_commit)) = self.advance_to_in_progress(id)? else {
            return Ok(());
        };

        eprintln!("[epic] {id}: invoking worker on {branch}");
        let request = BuildRequest {
            ticket_id: id.clone(),
            ticket_path: self.ticket(id)?.path.clone(),
            branch: branch.clone(),
            base_commit,
            epic_path: self.epic_path.clone(),
            repo_path: self.ctx.repo.root.clone(),
            timeout_secs: self.builder_timeout_secs,
        };
        let result = match self.builder.execute(&request) {
            Ok(result) => result,
            Err(err) => {
                BuilderResult::failure(format!("worker invocation failed: {err}"), String::new())
            }
        };
        self.log_event(
            Some(id.clone()),
            EventKind::BuilderFinished {
                success: result.success,
                final_commit: result.final_commit.clone(),
            },
        );

        // Store the worker's claims; the validation gate decides
        // whether to trust them.
        {
            let ticket = self.ticket_mut(id)?;
            if let Some(info) = ticket.git_info.as_mut() {
                info.final_commit = result.final_commit.clone();
            }
            ticket.test_suite_status = result.test_status;
            ticket.acceptance_criteria = result.acceptance_criteria.clone();
        }
        self.set_ticket_state(id, TicketState::AwaitingValidation)?;

        if !result.success {
            let reason = result
                .error
                .unwrap_or_else(|| "worker reported failure".to_string());
            return self.fail_ticket(id, reason);
        }

        let validation = {
            let ticket = &self.ctx.tickets[id];
            ValidationGate.check(ticket, &self.ctx)
        };
        self.log_gate(id, ValidationGate.name(), &validation);
        if !validation.passed {
            return self.fail_ticket(id, format!("validation gate: {}", validation.reason));
        }

        self.ticket_mut(id)?.completed_at = Some(Utc::now());
        self.set_ticket_state(id, TicketState::Completed)?;
        eprintln!("[epic] {id}: COMPLETED");
        Ok(())
    }

    /// Branch-creation and start gates: `READY → BRANCH_CREATED →
    /// IN_PROGRESS`. Returns the branch and base commit, or `None` if
    /// a gate failed the ticket.
    fn advance_to_in_progress(
        &mut self,
        id: &TicketId,
    ) -> Result<Option<(String, String)>, ExecutorError> {
        let create = {
            let ticket = &self.ctx.tickets[id];
            CreateBranchGate.check(ticket, &self.ctx)
        };
        self.log_gate(id, CreateBranchGate.name(), &create);
        if !create.passed {
            self.fail_ticket(id, format!("create_branch gate: {}", create.reason))?;
            return Ok(None);
        }

        let branch = create
            .metadata
            .get("branch")
            .cloned()
            .unwrap_or_else(|| format!("ticket/{id}"));
        let base_commit = create
            .metadata
            .get("base_commit")
            .cloned()
            .unwrap_or_else(|| self.ctx.baseline_commit.clone());
        self.ticket_mut(id)?.git_info = Some(GitInfo {
            branch: branch.clone(),
            base_commit: base_commit.clone(),
            final_commit: None,
        });
        self.log_event(
            Some(id.clone()),
            EventKind::BranchCreated {
                branch: branch.clone(),
                base_commit: base_commit.clone(),
            },
        );
        self.set_ticket_state(id, TicketState::BranchCreated)?;

        let start = {
            let ticket = &self.ctx.tickets[id];
            BuilderStartGate.check(ticket, &self.ctx)
        };
        self.log_gate(id, BuilderStartGate.name(), &start);
        if !start.passed {
            self.fail_ticket(id, format!("builder_start gate: {}", start.reason))?;
            return Ok(None);
        }

        self.ticket_mut(id)?.started_at = Some(Utc::now());
        self.set_ticket_state(id, TicketState::InProgress)?;
        self.log_event(
            Some(id.clone()),
            EventKind::BuilderStarted {
                branch: branch.clone(),
            },
        );
        Ok(Some((branch, base_commit)))
    }

    /// Mark a ticket failed, cascade blocking to its dependents, and
    /// apply the critical-failure policy.
    fn fail_ticket(&mut self, id: &TicketId, reason: String) -> Result<(), ExecutorError> {
        eprintln!("[epic] {id}: FAILED: {reason}");
        self.ticket_mut(id)?.failure_reason = Some(reason.clone());
        self.set_ticket_state(id, TicketState::Failed)?;
        self.cascade_blocked(id)?;

        if self.ticket(id)?.critical {
            if self.ctx.rollback_on_failure {
                rollback_epic(&self.ctx, &self.log)?;
                self.set_epic_state(EpicState::RolledBack)?;
            } else {
                self.failure_reason = Some(format!("critical ticket {id} failed: {reason}"));
                self.set_epic_state(EpicState::Failed)?;
            }
        }
        Ok(())
    }

    fn cascade_blocked(&mut self, failed_id: &TicketId) -> Result<(), ExecutorError> {
        for dep_id in transitive_dependents(failed_id, &self.ctx.tickets) {
            if self.ticket(&dep_id)?.state.is_terminal() {
                continue;
            }
            self.ticket_mut(&dep_id)?.blocking_dependency = Some(failed_id.clone());
            self.log_event(
                Some(dep_id.clone()),
                EventKind::TicketBlocked {
                    blocking_dependency: failed_id.clone(),
                },
            );
            self.set_ticket_state(&dep_id, TicketState::Blocked)?;
        }
        Ok(())
    }

    /// Phase 2: squash-merge every completed ticket into the epic
    /// branch in dependency order, delete the ticket branches, push.
    /// Any merge conflict fails the epic and halts; no partial-merge
    /// recovery is attempted.
    pub fn finalize(&mut self) -> Result<(), ExecutorError> {
        if self.state.is_terminal() {
            return Ok(());
        }

        let remaining: Vec<TicketId> = self
            .ctx
            .tickets
            .values()
            .filter(|t| !t.state.is_terminal())
            .map(|t| t.id.clone())
            .collect();
        if !remaining.is_empty() {
            return Err(ExecutorError::Stalled { remaining });
        }

        if self.state == EpicState::Initializing {
            self.set_epic_state(EpicState::Executing)?;
        }
        self.set_epic_state(EpicState::Merging)?;
        let epic_branch = self.ctx.epic_branch.clone();

        let order = topological_order(&self.ctx.tickets, |t| t.state == TicketState::Completed);
        for id in order {
            let (branch, title) = {
                let ticket = &self.ctx.tickets[&id];
                let branch = ticket
                    .git_info
                    .as_ref()
                    .map(|info| info.branch.clone())
                    .unwrap_or_else(|| ticket.branch_name());
                (branch, ticket.title.clone())
            };

            // A previous finalize run that crashed after deleting the
            // branch has already collapsed this ticket.
            if !ops::branch_exists_local(&self.ctx.repo, &self.ctx.git, &branch)?
                && !ops::branch_exists_remote(&self.ctx.repo, &self.ctx.git, &branch)?
            {
                eprintln!("[epic] finalize: {branch} already collapsed, skipping");
                continue;
            }

            let message = format!("{id}: {title}\n\nSquash of branch {branch}.");
            match ops::squash_merge(&self.ctx.repo, &self.ctx.git, &branch, &epic_branch, &message)
            {
                Ok(commit) => {
                    eprintln!("[epic] finalize: merged {branch} as {commit}");
                    self.log_event(
                        Some(id.clone()),
                        EventKind::BranchMerged {
                            branch: branch.clone(),
                            commit,
                        },
                    );
                    ops::delete_branch(&self.ctx.repo, &self.ctx.git, &branch, true)?;
                    self.log_event(Some(id.clone()), EventKind::BranchDeleted { branch });
                }
                Err(err) => {
                    self.failure_reason =
                        Some(format!("merge conflict collapsing {branch}: {err}"));
                    self.set_epic_state(EpicState::Failed)?;
                    return Ok(());
                }
            }
        }

        ops::push_branch(&self.ctx.repo, &self.ctx.git, &epic_branch)?;
        self.set_epic_state(EpicState::Finalized)?;
        eprintln!("[epic] {}: FINALIZED", self.ctx.epic_id);
        Ok(())
    }

    /// Manual command: run the branch-creation and start gates for one
    /// ticket, leaving it `IN_PROGRESS` for an out-of-band worker.
    /// Repeating the call on an already started ticket is a no-op.
    pub fn start_ticket(&mut self, id: &TicketId) -> Result<TicketState, ExecutorError> {
        match self.ticket(id)?.state {
            TicketState::InProgress => return Ok(TicketState::InProgress),
            TicketState::Pending | TicketState::Ready => {}
            state => {
                return Err(ExecutorError::Command {
                    message: format!("ticket {id} is {state}; it cannot be started"),
                })
            }
        }
        if self.state == EpicState::Initializing {
            self.set_epic_state(EpicState::Executing)?;
        }

        if self.ticket(id)?.state == TicketState::Pending {
            let deps = {
                let ticket = &self.ctx.tickets[id];
                DependenciesMetGate.check(ticket, &self.ctx)
            };
            self.log_gate(id, DependenciesMetGate.name(), &deps);
            if !deps.passed {
                return Err(ExecutorError::Command {
                    message: format!("ticket {id} is not ready: {}", deps.reason),
                });
            }
            self.set_ticket_state(id, TicketState::Ready)?;
        }

        match self.advance_to_in_progress(id)? {
            Some(_) => Ok(TicketState::InProgress),
            None => Ok(TicketState::Failed),
        }
    }

    /// Manual command: take the ticket branch head as the reported
    /// final commit and run the validation gate. Idempotent for
    /// already completed tickets.
    pub fn complete_ticket(
        &mut self,
        id: &TicketId,
        test_status: TestSuiteStatus,
    ) -> Result<TicketState, ExecutorError> {
        match self.ticket(id)?.state {
            TicketState::Completed => return Ok(TicketState::Completed),
            TicketState::InProgress => {}
            state => {
                return Err(ExecutorError::Command {
                    message: format!("ticket {id} is {state}; it cannot be completed"),
                })
            }
        }

        let branch = self
            .ticket(id)?
            .git_info
            .as_ref()
            .map(|info| info.branch.clone())
            .ok_or_else(|| ExecutorError::Command {
                message: format!("ticket {id} has no branch recorded"),
            })?;
        let tip = ops::branch_tip(&self.ctx.repo, &self.ctx.git, &branch)?;

        {
            let ticket = self.ticket_mut(id)?;
            if let Some(info) = ticket.git_info.as_mut() {
                info.final_commit = Some(tip);
            }
            ticket.test_suite_status = Some(test_status);
        }
        self.set_ticket_state(id, TicketState::AwaitingValidation)?;

        let validation = {
            let ticket = &self.ctx.tickets[id];
            ValidationGate.check(ticket, &self.ctx)
        };
        self.log_gate(id, ValidationGate.name(), &validation);
        if !validation.passed {
            self.fail_ticket(id, format!("validation gate: {}", validation.reason))?;
            return Ok(TicketState::Failed);
        }

        self.ticket_mut(id)?.completed_at = Some(Utc::now());
        self.set_ticket_state(id, TicketState::Completed)?;
        Ok(TicketState::Completed)
    }

    /// Manual command: fail a ticket with an operator-supplied reason.
    /// Idempotent for already failed tickets.
    pub fn fail_ticket_command(
        &mut self,
        id: &TicketId,
        reason: &str,
    ) -> Result<TicketState, ExecutorError> {
        match self.ticket(id)?.state {
            TicketState::Failed => return Ok(TicketState::Failed),
            state if state.is_terminal() => {
                return Err(ExecutorError::Command {
                    message: format!("ticket {id} is {state}; it cannot be failed"),
                })
            }
            _ => {}
        }
        if self.state == EpicState::Initializing {
            self.set_epic_state(EpicState::Executing)?;
        }
        self.fail_ticket(id, reason.to_string())?;
        Ok(TicketState::Failed)
    }

    fn ticket(&self, id: &TicketId) -> Result<&Ticket, ExecutorError> {
        self.ctx
            .tickets
            .get(id)
            .ok_or_else(|| ExecutorError::UnknownTicket { id: id.clone() })
    }

    fn ticket_mut(&mut self, id: &TicketId) -> Result<&mut Ticket, ExecutorError> {
        self.ctx
            .tickets
            .get_mut(id)
            .ok_or_else(|| ExecutorError::UnknownTicket { id: id.clone() })
    }

    fn set_epic_state(&mut self, to: EpicState) -> Result<(), ExecutorError> {
        check_epic_transition(self.state, to)?;
        if self.state == to {
            return Ok(());
        }
        let from = self.state;
        self.state = to;
        if to == EpicState::Executing && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        eprintln!("[epic] {}: {from} -> {to}", self.ctx.epic_id);
        self.log_event(
            None,
            EventKind::EpicStateChanged {
                from: from.to_string(),
                to: to.to_string(),
            },
        );
        self.persist()
    }

    fn set_ticket_state(&mut self, id: &TicketId, to: TicketState) -> Result<(), ExecutorError> {
        let from = {
            let ticket = self.ticket_mut(id)?;
            let from = ticket.state;
            transition_ticket(ticket, to, Utc::now())?;
            from
        };
        if from != to {
            self.log_event(
                Some(id.clone()),
                EventKind::TicketStateChanged {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            );
        }
        self.persist()
    }

    fn persist(&self) -> Result<(), ExecutorError> {
        save_state(&self.state_path, &self.snapshot())?;
        Ok(())
    }

    fn log_gate(&self, id: &TicketId, gate: &'static str, result: &GateResult) {
        self.log_event(
            Some(id.clone()),
            EventKind::GateChecked {
                gate: gate.to_string(),
                passed: result.passed,
                reason: result.reason.clone(),
            },
        );
    }

    fn log_event(&self, ticket_id: Option<TicketId>, kind: EventKind) {
        let event = Event {
            id: next_event_id(),
            ticket_id,
            epic_id: Some(self.ctx.epic_id.clone()),
            at: Utc::now(),
            kind,
        };
        if let Err(err) = self.log.append_both(&event) {
            eprintln!("[epic] failed to append event: {err}");
        }
    }
}
