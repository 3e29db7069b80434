//! Subprocess runner for git plumbing.
//!
//! Arguments are always passed as a literal list, never through a
//! shell, so branch names and commit messages cannot be interpreted as
//! shell syntax.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a git command, treating any non-zero exit as an error.
    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (rendered, output) = self.capture(cwd, args)?;
        if !output.success() {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Run a git command and return the output regardless of exit
    /// status. Callers use this for queries where a non-zero exit is an
    /// answer (`merge-base --is-ancestor`, `rev-parse --verify`), not a
    /// failure. Only spawn and decoding problems are errors.
    pub fn try_run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let (_, output) = self.capture(cwd, args)?;
        Ok(output)
    }

    fn capture<I, S>(&self, cwd: &Path, args: I) -> Result<(String, GitOutput), GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, &owned_args);

        let mut command = Command::new(&self.binary);
        command.current_dir(cwd);
        command.args(&owned_args);

        let output = command.output().map_err(|source| GitError::Io {
            command: rendered.clone(),
            source,
        })?;

        let stdout = decode_stream(output.stdout, &rendered, "stdout")?;
        let stderr = decode_stream(output.stderr, &rendered, "stderr")?;

        Ok((
            rendered,
            GitOutput {
                status: output.status.code(),
                stdout,
                stderr,
            },
        ))
    }
}

fn decode_stream(
    bytes: Vec<u8>,
    command: &str,
    stream: &'static str,
) -> Result<String, GitError> {
    String::from_utf8(bytes).map_err(|_| GitError::NonUtf8Output {
        command: command.to_string(),
        stream,
    })
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::GitCli;
    use crate::error::GitError;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("raido-epic-git-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[test]
    fn run_returns_stdout_for_successful_command() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("command-ok");

        let output = git
            .run(&cwd, ["--version"])
            .expect("git --version should succeed");

        assert!(output.success());
        assert!(output.stdout.to_ascii_lowercase().contains("git version"));
        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn run_classifies_non_zero_exit_as_command_failed() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("command-fail");

        let err = git
            .run(&cwd, ["definitely-not-a-real-git-subcommand"])
            .expect_err("unknown git subcommand should fail");
        match err {
            GitError::CommandFailed {
                command,
                status,
                stderr,
                ..
            } => {
                assert!(command.contains("definitely-not-a-real-git-subcommand"));
                assert!(status.is_some());
                assert!(!stderr.trim().is_empty());
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn try_run_returns_output_for_non_zero_exit() {
        let git = GitCli::default();
        let cwd = unique_temp_dir("try-run");

        let output = git
            .try_run(&cwd, ["rev-parse", "--is-inside-work-tree"])
            .expect("try_run should not error on non-zero exit");
        assert!(!output.success());

        let _ = fs::remove_dir_all(cwd);
    }

    #[test]
    fn run_classifies_missing_binary_as_io_error() {
        let git = GitCli::new("/definitely/missing/git-binary");
        let cwd = unique_temp_dir("command-io");

        let err = git
            .run(&cwd, ["status"])
            .expect_err("missing binary should fail");
        match err {
            GitError::Io { command, source } => {
                assert!(command.contains("/definitely/missing/git-binary"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }

        let _ = fs::remove_dir_all(cwd);
    }
}
