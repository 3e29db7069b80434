//! Pty-backed worker invocation.
//!
//! The worker is an interactive CLI agent, so it runs on a pty rather
//! than plain pipes. The invocation is blocking with a hard deadline:
//! at timeout the child is killed and the ticket gets an ordinary
//! failure result. There is no cooperative cancellation.

use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::{BufRead, BufReader};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use epic_core::types::BuilderResult;

use crate::error::BuilderError;
use crate::report::{parse_builder_output, RESULT_BEGIN_MARKER, RESULT_END_MARKER};
use crate::types::{BuildRequest, TicketBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPtySize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for WorkerPtySize {
    fn default() -> Self {
        Self {
            rows: 40,
            cols: 120,
        }
    }
}

/// Production `TicketBuilder`: spawns the configured worker command in
/// a pty and interprets its printed result block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyWorker {
    /// Worker command, inserted verbatim into the shell invocation.
    /// Operator-supplied configuration, not worker-controlled data.
    pub command: String,
    pub shell_bin: String,
    pub pty_size: WorkerPtySize,
    pub poll_interval: Duration,
}

impl PtyWorker {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell_bin: "bash".to_string(),
            pty_size: WorkerPtySize::default(),
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl TicketBuilder for PtyWorker {
    fn execute(&self, request: &BuildRequest) -> Result<BuilderResult, BuilderError> {
        if request.timeout_secs == 0 {
            return Err(BuilderError::InvalidRequest {
                message: "timeout_secs must be greater than zero".to_string(),
            });
        }
        if self.command.trim().is_empty() {
            return Err(BuilderError::InvalidRequest {
                message: "worker command must not be empty".to_string(),
            });
        }

        let deadline = Instant::now() + Duration::from_secs(request.timeout_secs);

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: self.pty_size.rows,
                cols: self.pty_size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| BuilderError::PtySetup {
                message: err.to_string(),
            })?;

        let payload = render_instruction_payload(request);
        let invocation = render_shell_invocation(request, &self.command, &payload);

        let mut command = CommandBuilder::new(self.shell_bin.clone());
        command.arg("-lc");
        command.arg(invocation);

        let mut child = pair
            .slave
            .spawn_command(command)
            .map_err(|err| BuilderError::Spawn {
                message: err.to_string(),
            })?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| BuilderError::PtySetup {
                message: err.to_string(),
            })?;
        let (tx, rx) = mpsc::channel::<String>();
        let reader_handle = thread::spawn(move || {
            let mut buf = BufReader::new(reader);
            loop {
                let mut line = String::new();
                match buf.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let _ = tx.send(line);
                    }
                    Err(_) => break,
                }
            }
        });

        let mut raw_output = String::new();
        let mut timed_out = false;
        let mut wait_status = None;

        loop {
            drain_output(&rx, &mut raw_output);

            if Instant::now() >= deadline {
                timed_out = true;
                let _ = child.kill();
                break;
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    wait_status = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    return Err(BuilderError::Runtime {
                        message: err.to_string(),
                    });
                }
            }

            thread::sleep(self.poll_interval);
        }

        if wait_status.is_none() {
            child.wait().map_err(|err| BuilderError::Runtime {
                message: err.to_string(),
            })?;
        }

        let _ = reader_handle.join();
        drain_output(&rx, &mut raw_output);

        if timed_out {
            return Ok(BuilderResult::failure(
                format!("worker timed out after {}s", request.timeout_secs),
                raw_output,
            ));
        }

        Ok(parse_builder_output(&raw_output))
    }
}

fn drain_output(rx: &mpsc::Receiver<String>, raw_output: &mut String) {
    while let Ok(line) = rx.try_recv() {
        raw_output.push_str(&line);
    }
}

/// The instruction payload handed to the worker as its single argument.
fn render_instruction_payload(request: &BuildRequest) -> String {
    format!(
        "Implement ticket {id} as described in {ticket_path}.\n\
         \n\
         Work on branch '{branch}'. It has been created for you from commit\n\
         {base_commit} and pushed to origin. Commit every change to that\n\
         branch; do not touch any other branch. The epic definition lives at\n\
         {epic_path} for context.\n\
         \n\
         When you are done, print exactly one result block and nothing after it:\n\
         \n\
         {begin}\n\
         {{\"success\": true, \"final_commit\": \"<sha of your last commit>\", \
         \"test_status\": \"passing\", \"acceptance_criteria\": \
         [{{\"criterion\": \"<text>\", \"met\": true}}]}}\n\
         {end}\n",
        id = request.ticket_id,
        ticket_path = request.ticket_path.display(),
        branch = request.branch,
        base_commit = request.base_commit,
        epic_path = request.epic_path.display(),
        begin = RESULT_BEGIN_MARKER,
        end = RESULT_END_MARKER,
    )
}

fn render_shell_invocation(request: &BuildRequest, command: &str, payload: &str) -> String {
    format!(
        "cd {} && {} {}",
        shell_quote(&request.repo_path.display().to_string()),
        command,
        shell_quote(payload)
    )
}

fn shell_quote(value: &str) -> String {
    let escaped = value.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use epic_core::state::TestSuiteStatus;
    use epic_core::types::TicketId;

    use super::{
        render_instruction_payload, render_shell_invocation, shell_quote, PtyWorker,
    };
    use crate::error::BuilderError;
    use crate::types::{BuildRequest, TicketBuilder};

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("raido-builder-{prefix}-{now}"));
        fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    #[cfg(unix)]
    fn write_worker_script(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("worker.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        let mut perms = fs::metadata(&path).expect("stat").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    fn mk_request(repo_path: PathBuf, timeout_secs: u64) -> BuildRequest {
        BuildRequest {
            ticket_id: TicketId::new("T1"),
            ticket_path: PathBuf::from("tickets/T1.md"),
            branch: "ticket/T1".to_string(),
            base_commit: "abc123".to_string(),
            epic_path: PathBuf::from("epic.toml"),
            repo_path,
            timeout_secs,
        }
    }

    #[test]
    fn shell_quote_wraps_and_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("O'Reilly"), "'O'\"'\"'Reilly'");
    }

    #[test]
    fn payload_names_branch_base_and_paths() {
        let request = mk_request(PathBuf::from("/tmp/repo"), 60);
        let payload = render_instruction_payload(&request);

        assert!(payload.contains("ticket T1"));
        assert!(payload.contains("tickets/T1.md"));
        assert!(payload.contains("'ticket/T1'"));
        assert!(payload.contains("abc123"));
        assert!(payload.contains("epic.toml"));
        assert!(payload.contains("RAIDO_RESULT_BEGIN"));
        assert!(payload.contains("RAIDO_RESULT_END"));
    }

    #[test]
    fn invocation_changes_into_repo_and_quotes_payload() {
        let request = mk_request(PathBuf::from("/tmp/repo path"), 60);
        let invocation = render_shell_invocation(&request, "my-worker --fast", "do it");
        assert!(invocation.starts_with("cd '/tmp/repo path' && my-worker --fast 'do it'"));
    }

    #[test]
    fn execute_rejects_zero_timeout_before_spawning() {
        let worker = PtyWorker::new("true");
        let request = mk_request(PathBuf::from("/tmp"), 0);

        let err = worker
            .execute(&request)
            .expect_err("zero timeout must fail");
        assert!(matches!(
            err,
            BuilderError::InvalidRequest { message } if message.contains("timeout_secs")
        ));
    }

    #[test]
    fn execute_rejects_empty_command_before_spawning() {
        let worker = PtyWorker::new("   ");
        let request = mk_request(PathBuf::from("/tmp"), 60);

        let err = worker
            .execute(&request)
            .expect_err("empty command must fail");
        assert!(matches!(
            err,
            BuilderError::InvalidRequest { message } if message.contains("command")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn execute_parses_result_block_from_worker() {
        let dir = unique_temp_dir("success");
        let script = write_worker_script(
            &dir,
            r#"echo RAIDO_RESULT_BEGIN
echo '{"success": true, "final_commit": "abc123", "test_status": "skipped"}'
echo RAIDO_RESULT_END"#,
        );

        let worker = PtyWorker::new(script.display().to_string());
        let request = mk_request(dir.clone(), 30);
        let result = worker.execute(&request).expect("execute");

        assert!(result.success);
        assert_eq!(result.final_commit.as_deref(), Some("abc123"));
        assert_eq!(result.test_status, Some(TestSuiteStatus::Skipped));

        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn execute_without_result_block_is_a_failure_result() {
        let dir = unique_temp_dir("no-block");
        let script = write_worker_script(&dir, "echo just chatter");

        let worker = PtyWorker::new(script.display().to_string());
        let request = mk_request(dir.clone(), 30);
        let result = worker.execute(&request).expect("execute");

        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("contained no RAIDO_RESULT_BEGIN block"));
        assert!(result.raw_output.contains("just chatter"));

        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn execute_kills_worker_at_deadline_and_reports_timeout() {
        let dir = unique_temp_dir("timeout");
        let script = write_worker_script(&dir, "sleep 30");

        let worker = PtyWorker::new(script.display().to_string());
        let request = mk_request(dir.clone(), 1);
        let result = worker.execute(&request).expect("execute");

        assert!(!result.success);
        assert!(result
            .error
            .as_deref()
            .unwrap()
            .contains("timed out after 1s"));

        let _ = fs::remove_dir_all(dir);
    }
}
