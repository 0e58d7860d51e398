//! SLURM adapter: `sbatch` to submit, `sacct` to poll status.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::task::GridResourceRequest;

use super::error::GridError;
use super::queue::{GridQueue, QueueStatus};
use super::script::render_submit_template;

const SUBMIT_TEMPLATE: &str =
    "sbatch --parsable --time={time} --mem={mem_mb} --cpus-per-task={cores} -p {partition} {extra} {script}";

static SACCT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<jobid>\d+)\|(?P<status>[A-Za-z_]+)\|(?P<cores>\d+)\|(?P<minutes>\d+)\|(?P<mem_kb>\d+)$")
        .expect("valid sacct line regex")
});

pub struct SlurmQueue;

#[async_trait]
impl GridQueue for SlurmQueue {
    async fn submit_command(
        &self,
        script_path: &Path,
        request: &GridResourceRequest,
        depends_bytes: u64,
    ) -> Result<String, GridError> {
        let rendered = render_submit_template(SUBMIT_TEMPLATE, request, depends_bytes, script_path);
        let mut parts = rendered.split_whitespace();
        let program = parts.next().ok_or(GridError::SubmissionFailed)?;
        let output = tokio::process::Command::new(program)
            .args(parts)
            .output()
            .await
            .map_err(|_| GridError::SubmissionFailed)?;
        if !output.status.success() {
            return Err(GridError::SubmissionFailed);
        }
        String::from_utf8_lossy(&output.stdout).trim().split(';').next().map(str::to_string).ok_or(GridError::SubmissionFailed)
    }

    fn submit_template(&self) -> &str {
        SUBMIT_TEMPLATE
    }

    async fn refresh_queue_status(&self, jobids: &[String]) -> Result<Vec<QueueStatus>, GridError> {
        if jobids.is_empty() {
            return Ok(Vec::new());
        }
        let output = tokio::process::Command::new("sacct")
            .arg("-n")
            .arg("-P")
            .arg("--format=JobID,State,NCPUS,ElapsedRaw,MaxRSS")
            .arg("-j")
            .arg(jobids.join(","))
            .output()
            .await
            .map_err(|e| GridError::QueryFailed(e.to_string()))?;

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| {
                let caps = SACCT_LINE.captures(line)?;
                Some(QueueStatus {
                    jobid: caps["jobid"].to_string(),
                    status: caps["status"].to_string(),
                    cores: caps["cores"].parse().unwrap_or(1),
                    minutes: caps["minutes"].parse::<u64>().unwrap_or(0) / 60,
                    mem_kb: caps["mem_kb"].parse().unwrap_or(0),
                })
            })
            .collect())
    }

    fn job_stopped(&self, status: &QueueStatus) -> bool {
        !matches!(status.status.as_str(), "RUNNING" | "PENDING" | "REQUEUED" | "SUSPENDED")
    }

    fn job_failed(&self, status: &QueueStatus) -> bool {
        matches!(status.status.as_str(), "FAILED" | "NODE_FAIL" | "CANCELLED" | "BOOT_FAIL")
    }

    fn job_timeout(&self, status: &QueueStatus, _requested_minutes: u64) -> bool {
        status.status == "TIMEOUT"
    }

    fn job_memkill(&self, status: &QueueStatus, _requested_mem_mb: u64) -> bool {
        status.status == "OUT_OF_MEMORY"
    }

    async fn get_job_status_from_stderr(
        &self,
        stderr_path: &Path,
        status: &QueueStatus,
    ) -> Result<Option<String>, GridError> {
        let Ok(text) = std::fs::read_to_string(stderr_path) else {
            return Ok(None);
        };
        if text.contains("oom-kill") || text.contains("Out Of Memory") {
            return Ok(Some("OUT_OF_MEMORY".to_string()));
        }
        if text.contains("DUE TO TIME LIMIT") {
            return Ok(Some("TIMEOUT".to_string()));
        }
        Ok(Some(status.status.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_terminal_states() {
        let running = QueueStatus { jobid: "1".into(), status: "RUNNING".into(), cores: 1, minutes: 0, mem_kb: 0 };
        let failed = QueueStatus { jobid: "1".into(), status: "FAILED".into(), cores: 1, minutes: 0, mem_kb: 0 };
        let timeout = QueueStatus { jobid: "1".into(), status: "TIMEOUT".into(), cores: 1, minutes: 0, mem_kb: 0 };
        let q = SlurmQueue;
        assert!(!q.job_stopped(&running));
        assert!(q.job_stopped(&failed));
        assert!(q.job_failed(&failed));
        assert!(q.job_timeout(&timeout, 60));
    }
}
