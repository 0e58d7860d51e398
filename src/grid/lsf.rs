//! LSF adapter: `bsub` to submit, `bjobs` to poll. Unlike SLURM, LSF status
//! strings don't distinguish *why* a job stopped, so timeout/memory-kill are
//! classified by comparing `bjobs`-reported usage against what was requested.

use std::path::Path;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::task::GridResourceRequest;

use super::error::GridError;
use super::queue::{GridQueue, QueueStatus};
use super::script::render_submit_template;

const SUBMIT_TEMPLATE: &str = "bsub -K -W {time} -M {mem_mb} -n {cores} -q {partition} {extra} < {script}";

static JOBID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Job <(\d+)>").expect("valid jobid regex"));

static BJOBS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<jobid>\d+)\s+(?P<status>\S+)\s+(?P<cores>\d+)\s+(?P<minutes>\d+)\s+(?P<mem_kb>\d+)$")
        .expect("valid bjobs line regex")
});

pub struct LsfQueue;

#[async_trait]
impl GridQueue for LsfQueue {
    async fn submit_command(
        &self,
        script_path: &Path,
        request: &GridResourceRequest,
        depends_bytes: u64,
    ) -> Result<String, GridError> {
        let rendered = render_submit_template(SUBMIT_TEMPLATE, request, depends_bytes, script_path);
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .output()
            .await
            .map_err(|_| GridError::SubmissionFailed)?;
        let text = String::from_utf8_lossy(&output.stdout);
        JOBID_RE.captures(&text).map(|c| c[1].to_string()).ok_or(GridError::SubmissionFailed)
    }

    fn submit_template(&self) -> &str {
        SUBMIT_TEMPLATE
    }

    async fn refresh_queue_status(&self, jobids: &[String]) -> Result<Vec<QueueStatus>, GridError> {
        if jobids.is_empty() {
            return Ok(Vec::new());
        }
        let output = tokio::process::Command::new("bjobs")
            .arg("-noheader")
            .arg("-o")
            .arg("jobid stat nthreads run_time max_mem")
            .args(jobids)
            .output()
            .await
            .map_err(|e| GridError::QueryFailed(e.to_string()))?;

        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .lines()
            .filter_map(|line| {
                let caps = BJOBS_LINE.captures(line)?;
                Some(QueueStatus {
                    jobid: caps["jobid"].to_string(),
                    status: caps["status"].to_string(),
                    cores: caps["cores"].parse().unwrap_or(1),
                    minutes: caps["minutes"].parse().unwrap_or(0),
                    mem_kb: caps["mem_kb"].parse().unwrap_or(0),
                })
            })
            .collect())
    }

    fn job_stopped(&self, status: &QueueStatus) -> bool {
        matches!(status.status.as_str(), "DONE" | "EXIT")
    }

    fn job_failed(&self, status: &QueueStatus) -> bool {
        status.status == "EXIT"
    }

    /// LSF doesn't report "job was killed for exceeding wall time" directly;
    /// infer it by comparing reported run time against what was requested.
    fn job_timeout(&self, status: &QueueStatus, requested_minutes: u64) -> bool {
        status.status == "EXIT" && status.minutes >= requested_minutes
    }

    /// Same inference for memory: `bjobs`'s `max_mem` vs the requested MB.
    fn job_memkill(&self, status: &QueueStatus, requested_mem_mb: u64) -> bool {
        status.status == "EXIT" && status.mem_kb >= requested_mem_mb * 1024
    }

    async fn get_job_status_from_stderr(
        &self,
        stderr_path: &Path,
        status: &QueueStatus,
    ) -> Result<Option<String>, GridError> {
        let Ok(text) = std::fs::read_to_string(stderr_path) else {
            return Ok(None);
        };
        if text.contains("TERM_MEMLIMIT") {
            return Ok(Some("OUT_OF_MEMORY".to_string()));
        }
        if text.contains("TERM_RUNLIMIT") {
            return Ok(Some("TIMEOUT".to_string()));
        }
        Ok(Some(status.status.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_memkill_from_reported_usage() {
        let q = LsfQueue;
        let status = QueueStatus { jobid: "1".into(), status: "EXIT".into(), cores: 1, minutes: 5, mem_kb: 9000 };
        assert!(q.job_memkill(&status, 4));
        assert!(!q.job_memkill(&status, 16));
    }
}
