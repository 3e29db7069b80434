//! Transition gates.
//!
//! Each gate implements one polymorphic `check` contract and knows
//! nothing about the others; the executor holds an ordered list per
//! transition point. A failing git command is reported as a failed
//! gate, not an error, so the executor's failure handling stays
//! uniform.

use std::collections::BTreeMap;

use epic_core::state::{TestSuiteStatus, TicketState};
use epic_core::types::{EpicId, GateResult, Ticket, TicketId};
use epic_git::{ops, GitCli, RepoHandle};

/// Read-mostly bundle passed to every gate. Constructed once at
/// orchestrator initialization or resume; the ticket map is mutated in
/// place as tickets change state.
#[derive(Debug, Clone)]
pub struct EpicContext {
    pub epic_id: EpicId,
    pub epic_branch: String,
    /// Epic branch head at epic start; base for dependency-free tickets.
    pub baseline_commit: String,
    pub tickets: BTreeMap<TicketId, Ticket>,
    pub rollback_on_failure: bool,
    pub git: GitCli,
    pub repo: RepoHandle,
}

pub trait Gate {
    fn name(&self) -> &'static str;
    fn check(&self, ticket: &Ticket, ctx: &EpicContext) -> GateResult;
}

/// Passes iff every dependency is `COMPLETED`. An empty dependency set
/// always passes. Cycles are rejected at epic load time, so no
/// transitive walk happens here.
pub struct DependenciesMetGate;

impl Gate for DependenciesMetGate {
    fn name(&self) -> &'static str {
        "dependencies_met"
    }

    fn check(&self, ticket: &Ticket, ctx: &EpicContext) -> GateResult {
        for dep_id in &ticket.depends_on {
            match ctx.tickets.get(dep_id) {
                None => {
                    return GateResult::fail(format!("dependency {dep_id} is not a known ticket"))
                }
                Some(dep) if dep.state != TicketState::Completed => {
                    return GateResult::fail(format!(
                        "dependency {dep_id} is {}, not COMPLETED",
                        dep.state
                    ))
                }
                Some(_) => {}
            }
        }
        GateResult::pass()
    }
}

/// Computes the deterministic base commit, creates `ticket/{id}` from
/// it, and pushes it. The branch name and base commit come back in the
/// result metadata. Fails without creating anything if any dependency
/// lacks a final commit.
pub struct CreateBranchGate;

/// Base commit for a ticket branch: no dependencies → epic baseline;
/// one dependency → its final commit (true stacking); several → the
/// most recent among their final commits (diamond resolution).
pub fn compute_base_commit(ticket: &Ticket, ctx: &EpicContext) -> Result<String, String> {
    if ticket.depends_on.is_empty() {
        return Ok(ctx.baseline_commit.clone());
    }

    let mut finals = Vec::with_capacity(ticket.depends_on.len());
    for dep_id in &ticket.depends_on {
        let final_commit = ctx
            .tickets
            .get(dep_id)
            .and_then(|dep| dep.git_info.as_ref())
            .and_then(|info| info.final_commit.clone());
        match final_commit {
            Some(commit) => finals.push(commit),
            None => return Err(format!("dependency {dep_id} has no final commit")),
        }
    }

    if finals.len() == 1 {
        return Ok(finals.remove(0));
    }
    ops::most_recent_commit(&ctx.repo, &ctx.git, &finals).map_err(|err| err.to_string())
}

impl Gate for CreateBranchGate {
    fn name(&self) -> &'static str {
        "create_branch"
    }

    fn check(&self, ticket: &Ticket, ctx: &EpicContext) -> GateResult {
        let base_commit = match compute_base_commit(ticket, ctx) {
            Ok(commit) => commit,
            Err(reason) => return GateResult::fail(reason),
        };

        let branch = ticket.branch_name();
        if let Err(err) = ops::create_branch(&ctx.repo, &ctx.git, &branch, &base_commit) {
            return GateResult::fail(format!("failed to create branch {branch}: {err}"));
        }
        if let Err(err) = ops::push_branch(&ctx.repo, &ctx.git, &branch) {
            return GateResult::fail(format!("failed to push branch {branch}: {err}"));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("branch".to_string(), branch);
        metadata.insert("base_commit".to_string(), base_commit);
        GateResult::pass_with_metadata(metadata)
    }
}

/// Enforces synchronous execution: fails when any other ticket is
/// active, or when the ticket's branch has not propagated to the
/// remote yet.
pub struct BuilderStartGate;

impl Gate for BuilderStartGate {
    fn name(&self) -> &'static str {
        "builder_start"
    }

    fn check(&self, ticket: &Ticket, ctx: &EpicContext) -> GateResult {
        if let Some(other) = ctx
            .tickets
            .values()
            .find(|t| t.id != ticket.id && t.state.is_active())
        {
            return GateResult::fail(format!(
                "ticket {} is already {}; only one ticket may be active",
                other.id, other.state
            ));
        }

        let branch = ticket.branch_name();
        match ops::branch_exists_remote(&ctx.repo, &ctx.git, &branch) {
            Ok(true) => GateResult::pass(),
            Ok(false) => GateResult::fail(format!("branch {branch} is not visible on origin")),
            Err(err) => GateResult::fail(format!("failed to probe origin for {branch}: {err}")),
        }
    }
}

/// The sole gatekeeper between worker claims and trusted completion.
/// Checks run in order; the first failure wins:
///   (a) the branch has at least one commit beyond its base,
///   (b) the reported final commit exists and is reachable from the
///       branch,
///   (c) tests pass (`skipped` tolerated only for non-critical tickets),
///   (d) every acceptance criterion is met.
pub struct ValidationGate;

impl Gate for ValidationGate {
    fn name(&self) -> &'static str {
        "validation"
    }

    fn check(&self, ticket: &Ticket, ctx: &EpicContext) -> GateResult {
        let Some(git_info) = &ticket.git_info else {
            return GateResult::fail("ticket has no git info; branch was never created");
        };
        let branch = &git_info.branch;

        match ops::commits_between(&ctx.repo, &ctx.git, &git_info.base_commit, branch) {
            Ok(commits) if commits.is_empty() => {
                return GateResult::fail(format!(
                    "branch {branch} has no commits beyond its base"
                ))
            }
            Ok(_) => {}
            Err(err) => return GateResult::fail(format!("failed to list commits: {err}")),
        }

        let Some(final_commit) = &git_info.final_commit else {
            return GateResult::fail("worker reported no final commit");
        };
        match ops::commit_exists(&ctx.repo, &ctx.git, final_commit) {
            Ok(true) => {}
            Ok(false) => {
                return GateResult::fail(format!(
                    "reported final commit {final_commit} does not exist"
                ))
            }
            Err(err) => return GateResult::fail(format!("failed to probe commit: {err}")),
        }
        match ops::commit_is_ancestor(&ctx.repo, &ctx.git, final_commit, branch) {
            Ok(true) => {}
            Ok(false) => {
                return GateResult::fail(format!(
                    "reported final commit {final_commit} is not reachable from {branch}"
                ))
            }
            Err(err) => return GateResult::fail(format!("failed to check ancestry: {err}")),
        }

        match ticket.test_suite_status {
            Some(TestSuiteStatus::Passing) => {}
            Some(TestSuiteStatus::Skipped) if !ticket.critical => {}
            Some(TestSuiteStatus::Skipped) => {
                return GateResult::fail("critical ticket may not skip its test suite")
            }
            Some(TestSuiteStatus::Failing) => {
                return GateResult::fail("test suite is failing")
            }
            None => return GateResult::fail("worker reported no test status"),
        }

        if let Some(unmet) = ticket.acceptance_criteria.iter().find(|c| !c.met) {
            return GateResult::fail(format!(
                "acceptance criterion not met: {}",
                unmet.criterion
            ));
        }

        GateResult::pass()
    }
}
