//! The grid submission pipeline (spec §4.5): write the script, submit it,
//! poll until it stops, classify the outcome, and escalate on
//! timeout/memory-kill up to `timeout_retry_max` times.

use std::path::Path;
use std::sync::Arc;

use crate::reporter::Reporter;
use crate::task::{GridResourceRequest, ResourceValue, Task, TaskResult};
use crate::tracked::Tracked;
use crate::utils::log;

use super::queue::{QueueClient, QueueStatus};
use super::script::{self, ScriptPaths};

const TIMEOUT_RETRY_MAX: u32 = 3;

/// Which resource axis exhausted and triggered a retry.
enum RetryKind {
    Timeout,
    MemKill,
}

/// Monotonic time-escalation factor for retry `attempt` (0-indexed), ranging
/// from 1.0 at the first retry to 2.7 at the last.
fn escalation_factor(attempt: u32) -> f64 {
    1.0 + 1.7 * attempt as f64 / TIMEOUT_RETRY_MAX as f64
}

/// Escalates only the resource axis that caused the retry: wall time on a
/// timeout, memory on a memory-kill, using the reported usage when the
/// scheduler provides it and doubling the request otherwise.
fn escalate(
    request: &GridResourceRequest,
    attempt: u32,
    depends_bytes: u64,
    retry_kind: &RetryKind,
    status: &QueueStatus,
) -> GridResourceRequest {
    let mut escalated = request.clone();
    match retry_kind {
        RetryKind::Timeout => {
            let factor = escalation_factor(attempt);
            let time_min = (request.time_min.evaluate(depends_bytes, request.cores) as f64 * factor) as u64;
            escalated.time_min = ResourceValue::Fixed(time_min);
        }
        RetryKind::MemKill => {
            let requested_mem_mb = request.mem_mb.evaluate(depends_bytes, request.cores);
            escalated.mem_mb = ResourceValue::Fixed(escalate_mem(requested_mem_mb, status));
        }
    }
    escalated
}

fn escalate_mem(requested_mem_mb: u64, status: &QueueStatus) -> u64 {
    if status.mem_kb > 0 {
        ((status.mem_kb as f64 / 1024.0) * 1.3) as u64
    } else {
        requested_mem_mb * 2
    }
}

fn total_depends_bytes(task: &Task) -> u64 {
    task.depends
        .iter()
        .filter_map(|d| match d {
            Tracked::File(f) => std::fs::metadata(f.path()).ok().map(|m| m.len()),
            _ => None,
        })
        .sum()
}

pub async fn execute(task: &Task, client: Arc<QueueClient>, tmpdir: &Path, reporter: &dyn Reporter) -> TaskResult {
    if task.actions.iter().any(|a| matches!(a, crate::task::ActionUnit::Callable(_))) {
        return TaskResult::failure(task.task_no, super::error::GridError::DecodeFailure.to_string());
    }

    let Some(base_request) = task.grid_request.clone() else {
        return TaskResult::failure(task.task_no, "task has no grid resource request");
    };
    let depends_bytes = total_depends_bytes(task);

    let mut request = base_request.clone();
    let mut attempt = 0;
    loop {
        match run_once(task, &request, depends_bytes, &client, tmpdir, reporter).await {
            Outcome::Success(paths, status) => {
                finish_success(task, &paths, &status, &client, reporter).await;
                return finish(task);
            }
            Outcome::Failure(msg) => return TaskResult::failure(task.task_no, msg),
            Outcome::Retry(kind, status) => {
                attempt += 1;
                if attempt >= TIMEOUT_RETRY_MAX {
                    return TaskResult::failure(task.task_no, format!("status {}", status.status));
                }
                reporter.task_grid_status(
                    task.task_no,
                    &status.jobid,
                    &format!("Resubmitting due to {}", status.status),
                );
                request = escalate(&base_request, attempt, depends_bytes, &kind, &status);
            }
        }
    }
}

fn finish(task: &Task) -> TaskResult {
    match crate::task::verify_and_compare(task) {
        Ok((keys, compares)) => TaskResult::success(task.task_no, keys, compares),
        Err(err) => TaskResult::failure(task.task_no, err),
    }
}

/// Collects benchmarking data (elapsed time, peak memory, cores) from the
/// terminating status and ships raw stdout/stderr to the logger, both per
/// spec §4.5's result-assembly step.
async fn finish_success(
    task: &Task,
    paths: &ScriptPaths,
    status: &QueueStatus,
    client: &Arc<QueueClient>,
    reporter: &dyn Reporter,
) {
    let mut status = status.clone();
    if status.cores == 0 && status.minutes == 0 && status.mem_kb == 0 {
        tokio::time::sleep(client.refresh_rate).await;
        if let Ok(Some(refreshed)) = client.status(&status.jobid).await {
            status = refreshed;
        }
    }
    reporter.task_grid_status(
        task.task_no,
        &status.jobid,
        &format!("finished: {}m elapsed, {}kb peak memory, {} cores", status.minutes, status.mem_kb, status.cores),
    );

    if let Ok(stdout) = std::fs::read_to_string(&paths.stdout) {
        log::info(format!("task {}: grid job {}: stdout:\n{stdout}", task.task_no, status.jobid));
    }
    if let Ok(stderr) = std::fs::read_to_string(&paths.stderr) {
        log::info(format!("task {}: grid job {}: stderr:\n{stderr}", task.task_no, status.jobid));
    }
}

enum Outcome {
    Success(ScriptPaths, QueueStatus),
    Failure(String),
    Retry(RetryKind, QueueStatus),
}

async fn run_once(
    task: &Task,
    request: &GridResourceRequest,
    depends_bytes: u64,
    client: &Arc<QueueClient>,
    tmpdir: &Path,
    reporter: &dyn Reporter,
) -> Outcome {
    let paths = match script::write_script(task, tmpdir) {
        Ok(p) => p,
        Err(e) => return Outcome::Failure(e.to_string()),
    };

    let jobid = match client.submit(&paths.script, request, depends_bytes).await {
        Ok(id) => id,
        Err(_) => return Outcome::Failure(super::error::GridError::SubmissionFailed.to_string()),
    };
    reporter.task_grid_status(task.task_no, &jobid, "submitted");

    let requested_minutes = request.time_min.evaluate(depends_bytes, request.cores);
    let requested_mem_mb = request.mem_mb.evaluate(depends_bytes, request.cores);

    loop {
        tokio::time::sleep(client.check_job_rate).await;

        let status = match client.status(&jobid).await {
            Ok(Some(s)) => s,
            Ok(None) => continue,
            Err(e) => return Outcome::Failure(e.to_string()),
        };

        reporter.task_grid_status_polling(task.task_no, &jobid, &status.status);

        if !client.queue().job_stopped(&status) {
            continue;
        }

        if client.queue().job_timeout(&status, requested_minutes) {
            return Outcome::Retry(RetryKind::Timeout, status);
        }
        if client.queue().job_memkill(&status, requested_mem_mb) {
            return Outcome::Retry(RetryKind::MemKill, status);
        }
        if client.queue().job_failed(&status) {
            return Outcome::Failure(classify_failure(task, &status, &paths.stderr, client).await);
        }

        match script::read_rc(&paths.rc) {
            Some(0) => return Outcome::Success(paths, status),
            Some(rc) => return Outcome::Failure(super::error::GridError::ReturnCode(rc.to_string()).to_string()),
            None => return Outcome::Failure(super::error::GridError::StatusError(status.status.clone()).to_string()),
        }
    }
}

async fn classify_failure(
    _task: &Task,
    status: &QueueStatus,
    stderr_path: &Path,
    client: &Arc<QueueClient>,
) -> String {
    match client.queue().get_job_status_from_stderr(stderr_path, status).await {
        Ok(Some(reason)) => super::error::GridError::StatusError(reason).to_string(),
        _ => super::error::GridError::StatusError(status.status.clone()).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_factor_ranges_from_one_to_two_point_seven() {
        assert!((escalation_factor(0) - 1.0).abs() < 1e-9);
        assert!((escalation_factor(TIMEOUT_RETRY_MAX) - 2.7).abs() < 1e-9);
    }

    #[test]
    fn mem_escalation_uses_reported_usage_when_available() {
        let status = QueueStatus { jobid: "1".into(), status: "OUT_OF_MEMORY".into(), cores: 1, minutes: 5, mem_kb: 2048 };
        assert_eq!(escalate_mem(512, &status), 2);
    }

    #[test]
    fn mem_escalation_doubles_the_request_without_reported_usage() {
        let status = QueueStatus { jobid: "1".into(), status: "OUT_OF_MEMORY".into(), cores: 1, minutes: 5, mem_kb: 0 };
        assert_eq!(escalate_mem(512, &status), 1024);
    }
}
