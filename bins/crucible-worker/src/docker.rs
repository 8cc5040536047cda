/// Container Driver - Bounded Execution of One Command
///
/// **Core Responsibility:**
/// Run one command inside a freshly created container, feed it stdin,
/// capture stdout/stderr in full, and always destroy the container.
///
/// **Execution Rules:**
/// 1. Every call generates a unique container name; concurrent calls never
///    collide and the name is the handle for out-of-band kill/removal
/// 2. The host working directory is bind-mounted at /work, which is also
///    the command's working directory inside the container
/// 3. Containers run with networking disabled, as `nobody`, under the
///    requested memory and CPU caps
/// 4. The wall-clock deadline is enforced from spawn; on expiry the
///    container is killed by name, then the child process is reaped
/// 5. `docker rm --force <name>` is issued on every exit path before the
///    call returns, so a returning call never leaks a container
///
/// **Failure Model:**
/// All per-execution failures are data on `ExecutionOutcome`, never errors:
/// the worker maps them to terminal job states in one place.
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Fixed bind-mount target and working directory inside every container
pub const CONTAINER_WORKDIR: &str = "/work";

/// Per-stream capture cap; output beyond this is discarded and flagged
pub const STREAM_CAP_BYTES: usize = 4 * 1024 * 1024;

const TRUNCATION_SENTINEL: &[u8] = b"\n[output truncated]";

/// The docker CLI exits with 125 when the `run` invocation itself fails
/// (daemon unreachable, image pull failure, refused mount) as opposed to
/// the contained command failing.
const DOCKER_RUN_FAILED: i64 = 125;

/// Grace period for reaping the CLI child after an out-of-band kill
const REAP_GRACE: Duration = Duration::from_secs(5);

/// One bounded container execution
#[derive(Debug)]
pub struct ExecutionRequest<'a> {
    pub image: &'a str,
    pub command: &'a [String],
    /// Host directory bind-mounted at `/work`
    pub workdir: &'a Path,
    pub stdin: &'a [u8],
    pub timeout_ms: u64,
    pub memory_limit_mib: u64,
    pub cpu_quota: f64,
}

/// Raw result of one container execution
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Process exit code; -1 when terminated by timeout or signal
    pub exit_code: i64,
    pub duration_ms: u64,
    pub timed_out: bool,
    /// The runtime itself could not be invoked or the image is unavailable
    pub spawn_failed: bool,
}

/// Stateless adapter over the container runtime CLI.
/// Safe to clone and call concurrently; per-call naming isolates executions.
#[derive(Debug, Clone)]
pub struct ContainerDriver {
    docker_bin: String,
}

impl ContainerDriver {
    pub fn new(docker_bin: impl Into<String>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    /// Execute one command in a fresh container.
    ///
    /// Never returns before the forced removal of the container has been
    /// attempted, regardless of how execution ended.
    pub async fn execute(&self, req: &ExecutionRequest<'_>) -> ExecutionOutcome {
        let container_name = format!("crucible-{}", Uuid::new_v4());
        let started = Instant::now();

        let outcome = self.run_container(&container_name, req, started).await;

        // Forced removal runs on every exit path; `--rm` alone does not
        // cover kills or daemon hiccups.
        self.remove_container(&container_name).await;

        outcome
    }

    async fn run_container(
        &self,
        name: &str,
        req: &ExecutionRequest<'_>,
        started: Instant,
    ) -> ExecutionOutcome {
        let args = run_args(name, req);
        debug!(container = name, image = req.image, "spawning container");

        let mut child = match Command::new(&self.docker_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return spawn_failure(
                    format!("failed to invoke container runtime '{}': {}", self.docker_bin, e),
                    started,
                );
            }
        };

        // Feed stdin and close it so the program sees EOF. A broken pipe
        // just means the program exited without reading; not an error.
        let stdin_pipe = child.stdin.take();
        let stdin_bytes = req.stdin.to_vec();
        let stdin_task = tokio::spawn(async move {
            if let Some(mut pipe) = stdin_pipe {
                let _ = pipe.write_all(&stdin_bytes).await;
                let _ = pipe.shutdown().await;
            }
        });

        // Both streams are drained concurrently so neither can fill its
        // pipe buffer and block the other (or the child).
        let stdout_task = tokio::spawn(read_capped(child.stdout.take(), STREAM_CAP_BYTES));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take(), STREAM_CAP_BYTES));

        let deadline = Duration::from_millis(req.timeout_ms);
        let (exit_code, timed_out) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (status.code().map(i64::from).unwrap_or(-1), false),
            Ok(Err(e)) => {
                warn!(container = name, error = %e, "failed to await container runtime");
                (-1, false)
            }
            Err(_) => {
                // Deadline expired. The out-of-band kill is authoritative:
                // it terminates the container even if the program ignores
                // signals, after which the CLI child exits and is reaped.
                warn!(
                    container = name,
                    timeout_ms = req.timeout_ms,
                    "execution deadline expired - killing container"
                );
                self.kill_container(name).await;

                if tokio::time::timeout(REAP_GRACE, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                (-1, true)
            }
        };

        let _ = stdin_task.await;
        let (stdout, stdout_truncated) = stdout_task.await.unwrap_or_default();
        let (mut stderr, stderr_truncated) = stderr_task.await.unwrap_or_default();

        if stdout_truncated || stderr_truncated {
            stderr.extend_from_slice(TRUNCATION_SENTINEL);
        }

        ExecutionOutcome {
            stdout,
            stderr,
            exit_code,
            duration_ms: started.elapsed().as_millis() as u64,
            timed_out,
            spawn_failed: !timed_out && exit_code == DOCKER_RUN_FAILED,
        }
    }

    async fn kill_container(&self, name: &str) {
        let result = Command::new(&self.docker_bin)
            .args(["kill", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            warn!(container = name, error = %e, "failed to kill container");
        }
    }

    /// Best-effort forced removal keyed on the generated name.
    /// An error here usually means `--rm` already cleaned up.
    async fn remove_container(&self, name: &str) {
        let result = Command::new(&self.docker_bin)
            .args(["rm", "--force", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) => debug!(container = name, success = status.success(), "container removal"),
            Err(e) => warn!(container = name, error = %e, "failed to run container removal"),
        }
    }
}

fn spawn_failure(message: String, started: Instant) -> ExecutionOutcome {
    ExecutionOutcome {
        stdout: Vec::new(),
        stderr: message.into_bytes(),
        exit_code: -1,
        duration_ms: started.elapsed().as_millis() as u64,
        timed_out: false,
        spawn_failed: true,
    }
}

fn run_args(name: &str, req: &ExecutionRequest<'_>) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--name".into(),
        name.to_string(),
        "--rm".into(),
        "--interactive".into(),
        "--volume".into(),
        format!("{}:{}", req.workdir.display(), CONTAINER_WORKDIR),
        "--workdir".into(),
        CONTAINER_WORKDIR.into(),
        "--network".into(),
        "none".into(),
        "--user".into(),
        "nobody".into(),
        "--memory".into(),
        format!("{}m", req.memory_limit_mib),
        "--cpus".into(),
        req.cpu_quota.to_string(),
        req.image.to_string(),
    ];
    args.extend(req.command.iter().cloned());
    args
}

/// Read a stream to completion, keeping at most `cap` bytes.
///
/// The stream is always drained even after the cap is hit, so the child is
/// never blocked on a full pipe while we wait for it to exit.
async fn read_capped<R>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut captured = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut truncated = false;

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if captured.len() < cap {
                    let take = n.min(cap - captured.len());
                    captured.extend_from_slice(&chunk[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(_) => break,
        }
    }

    (captured, truncated)
}
