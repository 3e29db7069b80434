//! Branch and commit operations used by gates, finalize, and recovery.
//!
//! Every operation is idempotent: re-running it against the same
//! repository state succeeds and leaves the same result. Non-zero git
//! exits surface as `GitError::CommandFailed` carrying the captured
//! output; callers decide whether that is fatal.

use chrono::{DateTime, Utc};

use crate::command::GitCli;
use crate::error::GitError;
use crate::repo::{current_branch, head_sha, RepoHandle};

/// Create (or re-point) a local branch at `base_commit`.
pub fn create_branch(
    repo: &RepoHandle,
    git: &GitCli,
    name: &str,
    base_commit: &str,
) -> Result<(), GitError> {
    if current_branch(repo, git)? == name {
        // `branch --force` refuses to move the checked-out branch.
        git.run(&repo.root, ["reset", "--hard", base_commit])?;
    } else {
        git.run(&repo.root, ["branch", "--force", name, base_commit])?;
    }
    Ok(())
}

/// Push a branch to origin, overwriting any stale remote state.
pub fn push_branch(repo: &RepoHandle, git: &GitCli, name: &str) -> Result<(), GitError> {
    let refspec = format!("{name}:refs/heads/{name}");
    git.run(&repo.root, ["push", "--force", "origin", refspec.as_str()])?;
    Ok(())
}

pub fn branch_exists_remote(
    repo: &RepoHandle,
    git: &GitCli,
    name: &str,
) -> Result<bool, GitError> {
    let refname = format!("refs/heads/{name}");
    let output = git.run(
        &repo.root,
        ["ls-remote", "--heads", "origin", refname.as_str()],
    )?;
    Ok(!output.stdout.trim().is_empty())
}

pub fn branch_exists_local(
    repo: &RepoHandle,
    git: &GitCli,
    name: &str,
) -> Result<bool, GitError> {
    let refname = format!("refs/heads/{name}");
    let output = git.try_run(
        &repo.root,
        ["rev-parse", "--verify", "--quiet", refname.as_str()],
    )?;
    Ok(output.success())
}

/// Delete a branch locally and, when `remote` is set, on origin.
/// Deleting a branch that does not exist is a no-op.
pub fn delete_branch(
    repo: &RepoHandle,
    git: &GitCli,
    name: &str,
    remote: bool,
) -> Result<(), GitError> {
    if remote && branch_exists_remote(repo, git, name)? {
        git.run(&repo.root, ["push", "origin", "--delete", name])?;
    }

    if branch_exists_local(repo, git, name)? {
        if current_branch(repo, git)? == name {
            git.run(&repo.root, ["checkout", "--detach"])?;
        }
        git.run(&repo.root, ["branch", "-D", name])?;
    }
    Ok(())
}

/// Commits reachable from `head` but not from `base`, oldest first.
pub fn commits_between(
    repo: &RepoHandle,
    git: &GitCli,
    base: &str,
    head: &str,
) -> Result<Vec<String>, GitError> {
    let range = format!("{base}..{head}");
    let output = git.run(&repo.root, ["rev-list", "--reverse", range.as_str()])?;
    Ok(output
        .stdout
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Tip commit of a local branch.
pub fn branch_tip(repo: &RepoHandle, git: &GitCli, name: &str) -> Result<String, GitError> {
    let refname = format!("refs/heads/{name}");
    let output = git.run(&repo.root, ["rev-parse", refname.as_str()])?;
    Ok(output.stdout.trim().to_string())
}

pub fn commit_exists(repo: &RepoHandle, git: &GitCli, id: &str) -> Result<bool, GitError> {
    let probe = format!("{id}^{{commit}}");
    let output = git.try_run(
        &repo.root,
        ["rev-parse", "--verify", "--quiet", probe.as_str()],
    )?;
    Ok(output.success())
}

/// Is `commit` reachable from the tip of `branch`?
pub fn commit_is_ancestor(
    repo: &RepoHandle,
    git: &GitCli,
    commit: &str,
    branch: &str,
) -> Result<bool, GitError> {
    let output = git.try_run(
        &repo.root,
        ["merge-base", "--is-ancestor", commit, branch],
    )?;
    match output.status {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        status => Err(GitError::CommandFailed {
            command: format!("git merge-base --is-ancestor {commit} {branch}"),
            status,
            stdout: output.stdout,
            stderr: output.stderr,
        }),
    }
}

pub fn commit_timestamp(
    repo: &RepoHandle,
    git: &GitCli,
    id: &str,
) -> Result<DateTime<Utc>, GitError> {
    let output = git.run(&repo.root, ["show", "-s", "--format=%cI", id])?;
    let raw = output.stdout.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| GitError::Parse {
            context: format!("committer timestamp '{raw}' for {id}: {err}"),
        })
}

/// Pick the most recent commit among the candidates, by committer
/// timestamp. Ties break on the commit id so diamond-dependency base
/// selection is deterministic.
pub fn most_recent_commit(
    repo: &RepoHandle,
    git: &GitCli,
    ids: &[String],
) -> Result<String, GitError> {
    if ids.is_empty() {
        return Err(GitError::Parse {
            context: "most_recent_commit requires at least one candidate".to_string(),
        });
    }

    let mut best_id = &ids[0];
    let mut best_at = commit_timestamp(repo, git, best_id)?;
    for id in &ids[1..] {
        let at = commit_timestamp(repo, git, id)?;
        if (at, id) > (best_at, best_id) {
            best_at = at;
            best_id = id;
        }
    }

    Ok(best_id.clone())
}

/// Squash-merge `source` into `target`, producing exactly one commit
/// with `message`. On conflict the target worktree is restored to its
/// pre-merge state and the underlying failure is returned.
pub fn squash_merge(
    repo: &RepoHandle,
    git: &GitCli,
    source: &str,
    target: &str,
    message: &str,
) -> Result<String, GitError> {
    checkout(repo, git, target)?;

    let merge = git.try_run(&repo.root, ["merge", "--squash", source])?;
    if !merge.success() {
        // No MERGE_HEAD exists for a squash, so `merge --abort` may
        // refuse; the hard reset is what actually clears the conflict.
        let _ = git.try_run(&repo.root, ["merge", "--abort"]);
        let _ = git.try_run(&repo.root, ["reset", "--hard", "HEAD"]);
        return Err(GitError::CommandFailed {
            command: format!("git merge --squash {source}"),
            status: merge.status,
            stdout: merge.stdout,
            stderr: merge.stderr,
        });
    }

    // `--allow-empty` keeps re-merges of already-applied work (resume
    // after a crash mid-finalize) from failing with "nothing to commit".
    git.run(&repo.root, ["commit", "--allow-empty", "-m", message])?;
    head_sha(repo, git)
}

/// Check out `branch` and hard-reset it to `commit`, discarding any
/// commits and tree changes beyond it.
pub fn hard_reset_branch(
    repo: &RepoHandle,
    git: &GitCli,
    branch: &str,
    commit: &str,
) -> Result<(), GitError> {
    checkout(repo, git, branch)?;
    git.run(&repo.root, ["reset", "--hard", commit])?;
    Ok(())
}

/// Stash uncommitted changes, including untracked files. Returns false
/// when the worktree was already clean.
pub fn stash_push(repo: &RepoHandle, git: &GitCli, message: &str) -> Result<bool, GitError> {
    let output = git.run(
        &repo.root,
        ["stash", "push", "--include-untracked", "-m", message],
    )?;
    Ok(!output.stdout.contains("No local changes to save"))
}

pub fn checkout(repo: &RepoHandle, git: &GitCli, refname: &str) -> Result<(), GitError> {
    git.run(&repo.root, ["checkout", refname])?;
    Ok(())
}
