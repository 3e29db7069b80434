use std::path::{Path, PathBuf};

use crate::command::GitCli;
use crate::error::GitError;

/// Root of a discovered working repository. All branch and commit
/// operations take the handle rather than a raw path so callers cannot
/// accidentally run git outside the epic's repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
}

pub fn discover_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let probe = git.try_run(start_path, ["rev-parse", "--show-toplevel"])?;
    if !probe.success() {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let root = PathBuf::from(probe.stdout.trim());
    Ok(RepoHandle { root })
}

pub fn current_branch(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

pub fn head_sha(repo: &RepoHandle, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(&repo.root, ["rev-parse", "HEAD"])?;
    Ok(output.stdout.trim().to_string())
}

/// Check if the worktree has uncommitted changes (staged, unstaged, or
/// untracked).
pub fn has_uncommitted_changes(repo: &RepoHandle, git: &GitCli) -> Result<bool, GitError> {
    let output = git.run(&repo.root, ["status", "--porcelain"])?;
    Ok(!output.stdout.trim().is_empty())
}
