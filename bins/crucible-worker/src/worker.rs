/// Worker - Claim, Execute, Commit
///
/// **Per-job protocol:**
/// 1. Claim the oldest pending job from the store
/// 2. Resolve its language recipe
/// 3. Create a private working directory and write the source into it
/// 4. Compile in a container (compiled languages only)
/// 5. Run in a container with the job's stdin
/// 6. Map the raw outcome to a terminal status and commit it
/// 7. Remove the working directory, success or failure
///
/// One failed job never takes down its worker: per-job errors and panics
/// become `internal_error` records and the loop continues. Exceptions
/// escape only for process-wide conditions (store unreachable), which the
/// claim loop absorbs with a backoff instead of unwinding.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crucible_common::languages::LanguageRecipe;
use crucible_common::{Config, JobOutcome, JobRecord, JobStatus, JobStore, LanguageRegistry};

use crate::docker::{ContainerDriver, ExecutionOutcome, ExecutionRequest};

/// Everything a worker task needs; cheap to clone, shared by all workers
#[derive(Clone)]
pub struct WorkerContext {
    pub store: JobStore,
    pub registry: Arc<LanguageRegistry>,
    pub driver: ContainerDriver,
    pub config: Arc<Config>,
}

/// Long-lived worker task: claim a job, execute it, commit, repeat.
/// Suspends on a bounded poll interval when the queue is empty and drains
/// its current job before honoring shutdown.
pub async fn run_worker(
    ctx: WorkerContext,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(worker_id = %worker_id, "worker ready");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match ctx.store.claim_one(&worker_id).await {
            Ok(Some(job)) => {
                let job_id = job.id;
                info!(
                    worker_id = %worker_id,
                    job_id = %job_id,
                    language = %job.language,
                    source_size = job.source_code.len(),
                    phase = "claimed",
                    "processing job"
                );

                // A panic inside job processing is confined to this task
                // and recorded like any other internal failure.
                let handle = tokio::spawn(process_job(ctx.clone(), job));
                match handle.await {
                    Ok(Ok(status)) => {
                        info!(job_id = %job_id, status = %status, phase = "done", "job committed");
                    }
                    Ok(Err(e)) => {
                        error!(job_id = %job_id, error = %e, phase = "failed", "job processing failed");
                        record_internal_error(&ctx, job_id, format!("worker error: {e:#}")).await;
                    }
                    Err(join_err) => {
                        error!(job_id = %job_id, error = %join_err, phase = "panicked", "job processing panicked");
                        record_internal_error(&ctx, job_id, format!("worker panicked: {join_err}"))
                            .await;
                        // The panicked task may not have reached its own cleanup
                        let _ = tokio::fs::remove_dir_all(job_workdir(&ctx.config, job_id)).await;
                    }
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ctx.config.poll_interval_ms)) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                error!(worker_id = %worker_id, error = %e, "job store error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    info!(worker_id = %worker_id, "worker stopped");
}

/// Periodically return claims whose worker died to the pending queue.
/// The bound is far above any configured execution time, so live claims
/// are never revoked.
pub async fn run_stale_claim_sweeper(ctx: WorkerContext, mut shutdown: watch::Receiver<bool>) {
    // Floor keeps the bound above every configurable timeout
    let bound = Duration::from_secs(ctx.config.stale_claim_secs.max(60));
    let mut ticker = tokio::time::interval(bound / 2);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        match ctx.store.requeue_stale(bound).await {
            Ok(0) => {}
            Ok(swept) => warn!(swept, "requeued stale claims"),
            Err(e) => error!(error = %e, "stale-claim sweep failed"),
        }
    }
}

#[instrument(skip(ctx, job), fields(job_id = %job.id, language = %job.language))]
async fn process_job(ctx: WorkerContext, job: JobRecord) -> Result<JobStatus> {
    let workdir = job_workdir(&ctx.config, job.id);
    prepare_workdir(&workdir).await?;

    let result = execute_claimed(&ctx, &job, &workdir).await;

    // Removed on every path; a job leaves nothing behind on the host
    if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
        warn!(job_id = %job.id, error = %e, "failed to remove working directory");
    }

    let (status, outcome) = result?;
    ctx.store.complete(job.id, status, &outcome).await?;
    Ok(status)
}

/// Compile (if the recipe asks for it) and run, mapping each container
/// outcome onto the job state machine
async fn execute_claimed(
    ctx: &WorkerContext,
    job: &JobRecord,
    workdir: &Path,
) -> Result<(JobStatus, JobOutcome)> {
    let recipe = ctx
        .registry
        .get(job.language)
        .context("claimed job references an unregistered language")?;

    tokio::fs::write(workdir.join(&recipe.source_filename), job.source_code.as_bytes())
        .await
        .context("Failed to write source file")?;

    if let Some(compile_command) = &recipe.compile_command {
        let outcome = ctx
            .driver
            .execute(&ExecutionRequest {
                image: &recipe.image,
                command: compile_command,
                workdir,
                stdin: b"",
                timeout_ms: recipe.compile_timeout_ms,
                memory_limit_mib: effective_memory(job, recipe),
                cpu_quota: effective_cpu(job, recipe),
            })
            .await;

        if outcome.spawn_failed {
            return Ok(internal_failure(&outcome));
        }
        if outcome.timed_out || outcome.exit_code != 0 {
            return Ok(compile_failure(&outcome));
        }
    }

    let run_timeout_ms = job
        .timeout_ms
        .map(|t| t as u64)
        .unwrap_or(recipe.run_timeout_ms);

    let outcome = ctx
        .driver
        .execute(&ExecutionRequest {
            image: &recipe.image,
            command: &recipe.run_command,
            workdir,
            stdin: job.stdin.as_bytes(),
            timeout_ms: run_timeout_ms,
            memory_limit_mib: effective_memory(job, recipe),
            cpu_quota: effective_cpu(job, recipe),
        })
        .await;

    Ok(classify_run(&outcome, run_timeout_ms))
}

pub(crate) fn job_workdir(config: &Config, job_id: Uuid) -> PathBuf {
    config.workdir_root.join(job_id.to_string())
}

/// The directory must be writable by the unprivileged user inside the
/// container so compile steps can drop artifacts next to the source.
async fn prepare_workdir(workdir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(workdir)
        .await
        .with_context(|| format!("Failed to create working directory {}", workdir.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(workdir, std::fs::Permissions::from_mode(0o777))
            .await
            .context("Failed to open working directory permissions")?;
    }

    Ok(())
}

fn effective_memory(job: &JobRecord, recipe: &LanguageRecipe) -> u64 {
    job.memory_limit_mib
        .map(|m| m as u64)
        .unwrap_or(recipe.memory_limit_mib)
}

fn effective_cpu(job: &JobRecord, recipe: &LanguageRecipe) -> f64 {
    job.cpu_quota.unwrap_or(recipe.cpu_quota)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Map the run-phase outcome to a terminal status.
///
/// Precedence: spawn failure, then timeout, then exit code. A timed-out
/// execution reports `exit_code = -1` and `execution_time_ms` equal to the
/// enforced deadline, with whatever output was captured before it fired.
pub(crate) fn classify_run(outcome: &ExecutionOutcome, timeout_ms: u64) -> (JobStatus, JobOutcome) {
    if outcome.spawn_failed {
        return internal_failure(outcome);
    }

    if outcome.timed_out {
        return (
            JobStatus::Timeout,
            JobOutcome {
                stdout: Some(lossy(&outcome.stdout)),
                stderr: Some(lossy(&outcome.stderr)),
                exit_code: Some(-1),
                execution_time_ms: Some(timeout_ms as i64),
                ..Default::default()
            },
        );
    }

    let status = if outcome.exit_code == 0 {
        JobStatus::Completed
    } else {
        JobStatus::RuntimeError
    };

    (
        status,
        JobOutcome {
            stdout: Some(lossy(&outcome.stdout)),
            stderr: Some(lossy(&outcome.stderr)),
            exit_code: Some(outcome.exit_code),
            execution_time_ms: Some(outcome.duration_ms as i64),
            ..Default::default()
        },
    )
}

/// Compile failures carry diagnostics in `compile_output` only; the run
/// never happened, so stdout/stderr are empty and the exit code unset.
pub(crate) fn compile_failure(outcome: &ExecutionOutcome) -> (JobStatus, JobOutcome) {
    let stdout = lossy(&outcome.stdout);
    let stderr = lossy(&outcome.stderr);

    let mut merged = stdout;
    if !merged.is_empty() && !stderr.is_empty() {
        merged.push('\n');
    }
    merged.push_str(&stderr);
    if outcome.timed_out {
        if !merged.is_empty() {
            merged.push('\n');
        }
        merged.push_str("[compilation timed out]");
    }

    (
        JobStatus::CompileError,
        JobOutcome {
            stdout: Some(String::new()),
            stderr: Some(String::new()),
            compile_output: Some(merged),
            ..Default::default()
        },
    )
}

fn internal_failure(outcome: &ExecutionOutcome) -> (JobStatus, JobOutcome) {
    let detail = lossy(&outcome.stderr);
    let message = if detail.trim().is_empty() {
        "container runtime invocation failed".to_string()
    } else {
        detail.trim().to_string()
    };

    (
        JobStatus::InternalError,
        JobOutcome {
            error_message: Some(message),
            ..Default::default()
        },
    )
}

async fn record_internal_error(ctx: &WorkerContext, job_id: Uuid, message: String) {
    let outcome = JobOutcome {
        error_message: Some(message),
        ..Default::default()
    };
    if let Err(e) = ctx
        .store
        .complete(job_id, JobStatus::InternalError, &outcome)
        .await
    {
        error!(job_id = %job_id, error = %e, "failed to record internal error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: i64) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
            exit_code,
            duration_ms: 37,
            timed_out: false,
            spawn_failed: false,
        }
    }

    #[test]
    fn test_clean_exit_maps_to_completed() {
        let (status, result) = classify_run(&outcome(0), 5_000);

        assert_eq!(status, JobStatus::Completed);
        assert_eq!(result.stdout.as_deref(), Some("out"));
        assert_eq!(result.stderr.as_deref(), Some("err"));
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.execution_time_ms, Some(37));
        assert!(result.error_message.is_none());
        assert!(result.compile_output.is_none());
    }

    #[test]
    fn test_nonzero_exit_maps_to_runtime_error() {
        let (status, result) = classify_run(&outcome(3), 5_000);

        assert_eq!(status, JobStatus::RuntimeError);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout.as_deref(), Some("out"));
    }

    #[test]
    fn test_timeout_maps_to_timeout_with_deadline_duration() {
        let raw = ExecutionOutcome {
            stdout: b"partial".to_vec(),
            stderr: Vec::new(),
            exit_code: -1,
            duration_ms: 1_100,
            timed_out: true,
            spawn_failed: false,
        };

        let (status, result) = classify_run(&raw, 1_000);

        assert_eq!(status, JobStatus::Timeout);
        assert_eq!(result.exit_code, Some(-1));
        assert_eq!(result.execution_time_ms, Some(1_000));
        // Output captured before the deadline is preserved
        assert_eq!(result.stdout.as_deref(), Some("partial"));
    }

    #[test]
    fn test_spawn_failure_maps_to_internal_error() {
        let raw = ExecutionOutcome {
            stdout: Vec::new(),
            stderr: b"pull access denied for no-such-image\n".to_vec(),
            exit_code: 125,
            duration_ms: 90,
            timed_out: false,
            spawn_failed: true,
        };

        let (status, result) = classify_run(&raw, 5_000);

        assert_eq!(status, JobStatus::InternalError);
        assert_eq!(
            result.error_message.as_deref(),
            Some("pull access denied for no-such-image")
        );
        assert!(result.stdout.is_none());
        assert!(result.exit_code.is_none());
    }

    #[test]
    fn test_spawn_failure_without_detail_gets_fallback_message() {
        let raw = ExecutionOutcome {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: -1,
            duration_ms: 1,
            timed_out: false,
            spawn_failed: true,
        };

        let (status, result) = classify_run(&raw, 5_000);

        assert_eq!(status, JobStatus::InternalError);
        assert_eq!(
            result.error_message.as_deref(),
            Some("container runtime invocation failed")
        );
    }

    /// Timeout precedence: a timed-out run never counts as completed,
    /// whatever exit code the reaped child reported
    #[test]
    fn test_timeout_takes_precedence_over_exit_code() {
        let raw = ExecutionOutcome {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: 0,
            duration_ms: 2_000,
            timed_out: true,
            spawn_failed: false,
        };

        let (status, _) = classify_run(&raw, 2_000);
        assert_eq!(status, JobStatus::Timeout);
    }

    /// Spawn failure precedence: infrastructure problems are never
    /// attributed to the submission
    #[test]
    fn test_spawn_failure_takes_precedence_over_timeout() {
        let raw = ExecutionOutcome {
            stdout: Vec::new(),
            stderr: b"daemon unreachable".to_vec(),
            exit_code: -1,
            duration_ms: 10,
            timed_out: true,
            spawn_failed: true,
        };

        let (status, _) = classify_run(&raw, 5_000);
        assert_eq!(status, JobStatus::InternalError);
    }

    #[test]
    fn test_compile_failure_merges_both_streams() {
        let raw = ExecutionOutcome {
            stdout: b"note: candidate".to_vec(),
            stderr: b"error: expected ';'".to_vec(),
            exit_code: 1,
            duration_ms: 300,
            timed_out: false,
            spawn_failed: false,
        };

        let (status, result) = compile_failure(&raw);

        assert_eq!(status, JobStatus::CompileError);
        assert_eq!(
            result.compile_output.as_deref(),
            Some("note: candidate\nerror: expected ';'")
        );
        // The run never happened
        assert_eq!(result.stdout.as_deref(), Some(""));
        assert_eq!(result.stderr.as_deref(), Some(""));
        assert!(result.exit_code.is_none());
        assert!(result.execution_time_ms.is_none());
    }

    #[test]
    fn test_compile_timeout_is_flagged_in_output() {
        let raw = ExecutionOutcome {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: -1,
            duration_ms: 15_000,
            timed_out: true,
            spawn_failed: false,
        };

        let (status, result) = compile_failure(&raw);

        assert_eq!(status, JobStatus::CompileError);
        assert_eq!(result.compile_output.as_deref(), Some("[compilation timed out]"));
    }

    #[test]
    fn test_workdirs_are_unique_per_job() {
        let config = Config::from_env();
        let a = job_workdir(&config, Uuid::new_v4());
        let b = job_workdir(&config, Uuid::new_v4());

        assert_ne!(a, b);
        assert!(a.starts_with(&config.workdir_root));
    }
}
