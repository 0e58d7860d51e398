//! The scheduler-client contract (spec §4.5) and a caching wrapper around it.
//!
//! Grounded on dagrs's `ExecState`/executor pairing of "shared state behind a
//! mutex, polled by whichever worker needs it next" — here generalized to two
//! independent locks: one for the cached queue snapshot, one to serialize and
//! rate-limit submissions so a burst of ready grid tasks doesn't hammer the
//! scheduler's submit command.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::task::GridResourceRequest;

use super::error::GridError;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatus {
    pub jobid: String,
    pub status: String,
    pub cores: u32,
    pub minutes: u64,
    pub mem_kb: u64,
}

/// A batch-scheduler adapter (SLURM, LSF, ...). Implementors own how a job
/// gets submitted and how its reported status maps onto stop/fail/timeout/
/// memory-kill classifications.
#[async_trait]
pub trait GridQueue: Send + Sync {
    /// Submits a script and returns the scheduler's job id. `request` and
    /// `depends_bytes` are passed alongside the literal contract's
    /// `submit_command(script_path)` because every real scheduler needs the
    /// resource ask (cores/time/mem/partition) to build its submit command or
    /// directive block, and anadama renders those into `submit_template()`
    /// rather than hardcoding flags per adapter.
    async fn submit_command(
        &self,
        script_path: &Path,
        request: &GridResourceRequest,
        depends_bytes: u64,
    ) -> Result<String, GridError>;

    fn submit_template(&self) -> &str;

    async fn refresh_queue_status(&self, jobids: &[String]) -> Result<Vec<QueueStatus>, GridError>;

    fn job_stopped(&self, status: &QueueStatus) -> bool;
    fn job_failed(&self, status: &QueueStatus) -> bool;
    fn job_timeout(&self, status: &QueueStatus, requested_minutes: u64) -> bool;
    fn job_memkill(&self, status: &QueueStatus, requested_mem_mb: u64) -> bool;

    async fn get_job_status_from_stderr(
        &self,
        stderr_path: &Path,
        status: &QueueStatus,
    ) -> Result<Option<String>, GridError>;
}

pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_secs(600);
pub const DEFAULT_CHECK_JOB_RATE: Duration = Duration::from_secs(60);
pub const DEFAULT_SUBMIT_SLEEP: Duration = Duration::from_secs(5);

struct StatusCache {
    by_jobid: HashMap<String, QueueStatus>,
    last_refresh: Option<Instant>,
}

/// Wraps a [`GridQueue`] with the cached/rate-limited query policy spec §4.5
/// describes: status lookups reuse a snapshot refreshed at most every
/// `refresh_rate`, and submissions are spaced at least `submit_sleep` apart.
pub struct QueueClient {
    queue: std::sync::Arc<dyn GridQueue>,
    cache: Mutex<StatusCache>,
    submit_gate: Mutex<Option<Instant>>,
    tracked_jobids: Mutex<HashSet<String>>,
    pub refresh_rate: Duration,
    pub check_job_rate: Duration,
    pub submit_sleep: Duration,
}

impl QueueClient {
    pub fn new(queue: std::sync::Arc<dyn GridQueue>) -> Self {
        Self {
            queue,
            cache: Mutex::new(StatusCache { by_jobid: HashMap::new(), last_refresh: None }),
            submit_gate: Mutex::new(None),
            tracked_jobids: Mutex::new(HashSet::new()),
            refresh_rate: DEFAULT_REFRESH_RATE,
            check_job_rate: DEFAULT_CHECK_JOB_RATE,
            submit_sleep: DEFAULT_SUBMIT_SLEEP,
        }
    }

    pub fn queue(&self) -> &dyn GridQueue {
        self.queue.as_ref()
    }

    /// Submits a script, first waiting out any remaining `submit_sleep`
    /// window since the last submission (spec §4.5: jobs are submitted no
    /// faster than `submit_sleep` apart to avoid flooding the scheduler).
    pub async fn submit(
        &self,
        script_path: &Path,
        request: &GridResourceRequest,
        depends_bytes: u64,
    ) -> Result<String, GridError> {
        let mut gate = self.submit_gate.lock().await;
        if let Some(last) = *gate {
            let elapsed = last.elapsed();
            if elapsed < self.submit_sleep {
                tokio::time::sleep(self.submit_sleep - elapsed).await;
            }
        }
        let result = self.queue.submit_command(script_path, request, depends_bytes).await;
        *gate = Some(Instant::now());
        if let Ok(jobid) = &result {
            self.tracked_jobids.lock().await.insert(jobid.clone());
        }
        result
    }

    /// Returns the cached status for `jobid`, refreshing the snapshot for
    /// every jobid this client has ever submitted if it is older than
    /// `refresh_rate` or doesn't yet have an entry for `jobid` — one
    /// scheduler query serves every grid worker polling concurrently instead
    /// of one query per job.
    pub async fn status(&self, jobid: &str) -> Result<Option<QueueStatus>, GridError> {
        let mut cache = self.cache.lock().await;
        let stale = cache.last_refresh.map(|t| t.elapsed() >= self.refresh_rate).unwrap_or(true);
        if stale || !cache.by_jobid.contains_key(jobid) {
            let all_tracked: Vec<String> = self.tracked_jobids.lock().await.iter().cloned().collect();
            let fresh = self.queue.refresh_queue_status(&all_tracked).await?;
            cache.by_jobid = fresh.into_iter().map(|s| (s.jobid.clone(), s)).collect();
            cache.last_refresh = Some(Instant::now());
        }
        Ok(cache.by_jobid.get(jobid).cloned())
    }
}
