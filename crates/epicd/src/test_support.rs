//! Shared test fixtures: a throwaway work clone with a bare origin,
//! plus a function-backed builder for scripting worker outcomes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use epic_builder::{BuildRequest, BuilderError, TicketBuilder};
use epic_core::types::BuilderResult;
use epic_git::{discover_repo, ops, GitCli, RepoHandle};

pub(crate) struct GitFixture {
    pub base: PathBuf,
    pub repo: RepoHandle,
    pub git: GitCli,
}

impl GitFixture {
    /// Work clone on `main` with one commit, wired to a bare origin.
    pub fn new(prefix: &str) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let base = std::env::temp_dir().join(format!("raido-epicd-{prefix}-{now}"));
        let origin = base.join("origin.git");
        let work = base.join("work");
        fs::create_dir_all(&origin).expect("create origin dir");
        fs::create_dir_all(&work).expect("create work dir");

        run_git(&origin, &["init", "--bare"]);
        run_git(&work, &["init", "-b", "main"]);
        run_git(&work, &["config", "user.name", "Test User"]);
        run_git(&work, &["config", "user.email", "test@example.com"]);
        run_git(
            &work,
            &["remote", "add", "origin", origin.to_str().expect("utf8")],
        );

        let git = GitCli::default();
        let repo = discover_repo(&work, &git).expect("discover repo");
        let fixture = Self { base, repo, git };
        fixture.commit_file("README.md", "init\n", "init", "2026-01-01T10:00:00+00:00");
        fixture.run_git(&["push", "-u", "origin", "main"]);
        fixture
    }

    pub fn run_git(&self, args: &[&str]) {
        run_git(&self.repo.root, args);
    }

    /// Commit a file with a fixed committer date, returning the sha.
    pub fn commit_file(&self, name: &str, content: &str, message: &str, date: &str) -> String {
        commit_file_in(&self.repo.root, name, content, message, date)
    }

    pub fn head(&self) -> String {
        epic_git::head_sha(&self.repo, &self.git).expect("head sha")
    }

    pub fn create_branch(&self, name: &str, base: &str) {
        ops::create_branch(&self.repo, &self.git, name, base).expect("create branch");
    }

    pub fn push_branch(&self, name: &str) {
        ops::push_branch(&self.repo, &self.git, name).expect("push branch");
    }

    pub fn checkout(&self, name: &str) {
        ops::checkout(&self.repo, &self.git, name).expect("checkout");
    }

    pub fn branch_exists_local(&self, name: &str) -> bool {
        ops::branch_exists_local(&self.repo, &self.git, name).expect("local probe")
    }

    pub fn branch_exists_remote(&self, name: &str) -> bool {
        ops::branch_exists_remote(&self.repo, &self.git, name).expect("remote probe")
    }
}

impl Drop for GitFixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.base);
    }
}

/// Commit a file in an arbitrary worktree with a fixed committer date,
/// returning the sha. Free function so builder closures can commit
/// without borrowing a fixture.
pub(crate) fn commit_file_in(
    root: &Path,
    name: &str,
    content: &str,
    message: &str,
    date: &str,
) -> String {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(&path, content).expect("write file");
    run_git(root, &["add", name]);
    let output = Command::new("git")
        .args(["commit", "-m", message])
        .env("GIT_AUTHOR_DATE", date)
        .env("GIT_COMMITTER_DATE", date)
        .current_dir(root)
        .output()
        .expect("spawn git commit");
    assert!(
        output.status.success(),
        "git commit failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let head = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .expect("spawn git rev-parse");
    assert!(head.status.success());
    String::from_utf8_lossy(&head.stdout).trim().to_string()
}

fn run_git(cwd: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Builder backed by a closure, for scripting worker behavior.
pub(crate) struct FnBuilder<F>(pub F)
where
    F: Fn(&BuildRequest) -> Result<BuilderResult, BuilderError>;

impl<F> TicketBuilder for FnBuilder<F>
where
    F: Fn(&BuildRequest) -> Result<BuilderResult, BuilderError>,
{
    fn execute(&self, request: &BuildRequest) -> Result<BuilderResult, BuilderError> {
        (self.0)(request)
    }
}
