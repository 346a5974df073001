//! Job execution: spawn one job's command under a hard timeout.
//!
//! Commands are spawned argv-style with no shell interpreter and a scrubbed
//! environment, inside an isolated per-run working directory. The executor
//! returns an `ExecutionResult` for the ledger to persist; it never touches
//! job state itself and never retries.

use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncReadExt;
use tracing::debug;

use panelcron_types::{CronJob, ExecutionResult};

use crate::command::{CommandPolicy, split_argv};

/// Runs job commands. Cheap to clone behind an `Arc`.
pub struct Executor {
    policy: CommandPolicy,
}

impl Executor {
    pub fn new(policy: CommandPolicy) -> Self {
        Self { policy }
    }

    /// Execute `job.command` in `work_dir`, enforcing the job's timeout.
    ///
    /// Every failure mode (validation, spawn error, timeout, non-zero exit)
    /// is folded into a failed `ExecutionResult`; this never returns an error.
    pub async fn execute(&self, job: &CronJob, work_dir: &Path) -> ExecutionResult {
        let started = Instant::now();

        if let Err(e) = self.policy.validate(&job.command) {
            return ExecutionResult::failed(e.to_string(), started.elapsed().as_secs_f64());
        }

        if let Err(e) = ensure_work_dir(work_dir) {
            return ExecutionResult::failed(
                format!("cannot prepare working directory {}: {e}", work_dir.display()),
                started.elapsed().as_secs_f64(),
            );
        }

        let argv = split_argv(&job.command);
        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(work_dir)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Ok(home) = std::env::var("HOME") {
            cmd.env("HOME", home);
        }
        #[cfg(unix)]
        {
            // Own process group, so the timeout kill reaches the whole tree.
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ExecutionResult::failed(
                    format!("failed to spawn '{}': {e}", argv[0]),
                    started.elapsed().as_secs_f64(),
                );
            }
        };

        let stdout_task = drain_pipe(child.stdout.take());
        let stderr_task = drain_pipe(child.stderr.take());

        let timeout = job.effective_timeout();
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Err(_) => {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    kill_process_group(pid);
                }
                let _ = child.kill().await;
                debug!(job_id = %job.id, "Job killed after {}s timeout", timeout.as_secs());
                return ExecutionResult::failed(
                    format!("timed out after {} seconds and was killed", timeout.as_secs()),
                    started.elapsed().as_secs_f64(),
                );
            }
            Ok(Err(e)) => {
                return ExecutionResult::failed(
                    format!("wait on child process failed: {e}"),
                    started.elapsed().as_secs_f64(),
                );
            }
            Ok(Ok(status)) => status,
        };

        let duration = started.elapsed().as_secs_f64();
        let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
        let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

        if status.success() {
            ExecutionResult::completed(stdout, duration)
        } else {
            let output = if !stderr.is_empty() {
                stderr
            } else if !stdout.is_empty() {
                stdout
            } else {
                format!("exited with status {status}")
            };
            ExecutionResult::failed(output, duration)
        }
    }
}

fn ensure_work_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

fn drain_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    // The child is its own group leader; a negative pgid signals the group.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}
