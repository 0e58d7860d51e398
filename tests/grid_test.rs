//! Grid submission pipeline tests against a fake scheduler.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anadama::grid::{GridError, GridQueue, QueueClient, QueueStatus};
use anadama::reporter::SilentReporter;
use anadama::task::{ActionUnit, GridResourceRequest, Task};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

/// A scheduler double that times out on the first submission and completes
/// successfully on the second, so a single test exercises escalation.
#[derive(Debug, Default)]
struct FlakyQueue {
    submissions: AtomicUsize,
}

#[async_trait]
impl GridQueue for FlakyQueue {
    async fn submit_command(
        &self,
        script_path: &Path,
        _request: &GridResourceRequest,
        _depends_bytes: u64,
    ) -> Result<String, GridError> {
        let attempt = self.submissions.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Ok("job-0".to_string())
        } else {
            std::fs::write(script_path.with_extension("rc"), "0\n").unwrap();
            Ok("job-1".to_string())
        }
    }

    fn submit_template(&self) -> &str {
        "sbatch --time={time} --mem={mem_mb} -c {cores} {script}"
    }

    async fn refresh_queue_status(&self, jobids: &[String]) -> Result<Vec<QueueStatus>, GridError> {
        Ok(jobids
            .iter()
            .map(|jobid| {
                if jobid == "job-0" {
                    QueueStatus { jobid: jobid.clone(), status: "TIMEOUT".into(), cores: 1, minutes: 120, mem_kb: 0 }
                } else {
                    QueueStatus { jobid: jobid.clone(), status: "COMPLETED".into(), cores: 1, minutes: 1, mem_kb: 0 }
                }
            })
            .collect())
    }

    fn job_stopped(&self, status: &QueueStatus) -> bool {
        status.status != "RUNNING" && status.status != "PENDING"
    }

    fn job_failed(&self, status: &QueueStatus) -> bool {
        status.status == "FAILED"
    }

    fn job_timeout(&self, status: &QueueStatus, _requested_minutes: u64) -> bool {
        status.status == "TIMEOUT"
    }

    fn job_memkill(&self, status: &QueueStatus, _requested_mem_mb: u64) -> bool {
        status.status == "OUT_OF_MEMORY"
    }

    async fn get_job_status_from_stderr(
        &self,
        _stderr_path: &Path,
        _status: &QueueStatus,
    ) -> Result<Option<String>, GridError> {
        Ok(None)
    }
}

/// A scheduler double whose jobs always come back `FAILED`, to exercise the
/// submission-failure/classification path instead of the escalation path.
#[derive(Debug, Default)]
struct AlwaysFailsQueue;

#[async_trait]
impl GridQueue for AlwaysFailsQueue {
    async fn submit_command(
        &self,
        _script_path: &Path,
        _request: &GridResourceRequest,
        _depends_bytes: u64,
    ) -> Result<String, GridError> {
        Err(GridError::SubmissionFailed)
    }

    fn submit_template(&self) -> &str {
        "bsub -W {time} -M {mem_mb} -n {cores} < {script}"
    }

    async fn refresh_queue_status(&self, _jobids: &[String]) -> Result<Vec<QueueStatus>, GridError> {
        Ok(Vec::new())
    }

    fn job_stopped(&self, _status: &QueueStatus) -> bool {
        true
    }

    fn job_failed(&self, _status: &QueueStatus) -> bool {
        true
    }

    fn job_timeout(&self, _status: &QueueStatus, _requested_minutes: u64) -> bool {
        false
    }

    fn job_memkill(&self, _status: &QueueStatus, _requested_mem_mb: u64) -> bool {
        false
    }

    async fn get_job_status_from_stderr(
        &self,
        _stderr_path: &Path,
        _status: &QueueStatus,
    ) -> Result<Option<String>, GridError> {
        Ok(None)
    }
}

fn test_task(target: &std::path::Path) -> Task {
    Task {
        task_no: 0,
        name: "grid-task".into(),
        actions: vec![ActionUnit::Shell(format!("echo done > {}", target.display()))],
        depends: Vec::new(),
        targets: vec![anadama::tracked::file(target)],
        grid_request: Some(GridResourceRequest::new(10u64, 512u64, 1)),
    }
}

#[tokio::test]
async fn timeout_triggers_escalated_resubmission_then_succeeds() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("out.txt");
    std::fs::write(&target, "done\n").unwrap();

    let queue = Arc::new(FlakyQueue::default());
    let client = Arc::new(QueueClient::new(queue.clone()));
    let task = test_task(&target);

    let result = anadama::grid::worker::execute(&task, client, dir.path(), &SilentReporter).await;

    assert!(result.is_success(), "expected success after escalated retry, got: {}", result.error);
    assert_eq!(queue.submissions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn submission_failure_is_reported_without_retrying() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("out.txt");
    let task = test_task(&target);

    let client = Arc::new(QueueClient::new(Arc::new(AlwaysFailsQueue)));
    let result = anadama::grid::worker::execute(&task, client, dir.path(), &SilentReporter).await;

    assert!(!result.is_success());
    assert_eq!(result.error, GridError::SubmissionFailed.to_string());
}

#[tokio::test]
async fn callable_action_is_rejected_before_any_submission() {
    use anadama::task::{Action, Input, Output};
    use anadama::utils::EnvVar;

    #[derive(Debug)]
    struct NoOp;
    impl Action for NoOp {
        fn run(&self, _input: Input, _env: Arc<EnvVar>) -> Output {
            Output::empty()
        }
    }

    let dir = tempdir().unwrap();
    let task = Task {
        task_no: 0,
        name: "callable-on-grid".into(),
        actions: vec![ActionUnit::Callable(Arc::new(NoOp))],
        depends: Vec::new(),
        targets: Vec::new(),
        grid_request: Some(GridResourceRequest::new(10u64, 512u64, 1)),
    };

    let client = Arc::new(QueueClient::new(Arc::new(AlwaysFailsQueue)));
    let result = anadama::grid::worker::execute(&task, client, dir.path(), &SilentReporter).await;

    assert!(!result.is_success());
    assert_eq!(result.error, GridError::DecodeFailure.to_string());
}
