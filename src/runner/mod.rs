//! Task dispatch (spec §4.3), adapted from dagrs's executor: each ready task
//! is spawned once its pool has a free permit, and every pool's completions
//! land on one shared result queue that the dispatcher drains.

pub mod dry;
pub mod local;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::backend::FingerprintBackend;
use crate::engine::graph::Graph;
use crate::grid::queue::QueueClient;
use crate::reporter::Reporter;
use crate::task::{Task, TaskResult};
use crate::utils::EnvVar;

pub enum PoolKind {
    Local,
    Grid { client: Arc<QueueClient>, tmpdir: PathBuf },
}

pub struct Pool {
    pub kind: PoolKind,
    pub capacity: Arc<Semaphore>,
}

pub struct RunOutcome {
    pub completed: HashSet<u64>,
    pub failed: HashSet<u64>,
    pub results: HashMap<u64, TaskResult>,
}

pub struct Runner {
    pub tasks: HashMap<u64, Arc<Task>>,
    pub dag: Arc<Graph>,
    pub backend: Arc<dyn FingerprintBackend>,
    pub reporter: Arc<dyn Reporter>,
    pub pools: HashMap<String, Pool>,
    pub default_pool: String,
    pub routes: HashMap<u64, String>,
    pub quit_early: bool,
}

impl Runner {
    fn pool_for(&self, task_no: u64) -> &str {
        self.routes.get(&task_no).map(String::as_str).unwrap_or(self.default_pool.as_str())
    }

    pub async fn run(&self, pending: VecDeque<u64>, mut completed: HashSet<u64>) -> RunOutcome {
        let total_pending: HashSet<u64> = pending.iter().copied().collect();
        let mut remaining_deps: HashMap<u64, usize> = HashMap::new();
        for &no in &pending {
            let unmet = self.dag.predecessors(no).into_iter().filter(|p| total_pending.contains(p)).count();
            remaining_deps.insert(no, unmet);
        }

        let mut ready: VecDeque<u64> = pending.iter().copied().filter(|no| remaining_deps[no] == 0).collect();
        let mut in_flight = 0usize;
        let mut failed: HashSet<u64> = HashSet::new();
        let mut results: HashMap<u64, TaskResult> = HashMap::new();
        let mut not_yet_ready: HashSet<u64> = total_pending.iter().copied().filter(|no| remaining_deps[no] != 0).collect();

        let (tx, rx) = async_channel::unbounded::<TaskResult>();
        let env = Arc::new(EnvVar::new());

        loop {
            // Synthesize failures for descendants of an already-failed parent
            // without ever dispatching them (spec §4.3).
            let mut synthesized: Vec<u64> = Vec::new();
            for &no in &not_yet_ready {
                if self.dag.predecessors(no).iter().any(|p| failed.contains(p)) {
                    synthesized.push(no);
                }
            }
            for no in synthesized {
                not_yet_ready.remove(&no);
                ready.retain(|&r| r != no);
                let parent =
                    self.dag.predecessors(no).into_iter().find(|p| failed.contains(p)).expect("a failed predecessor");
                let result = TaskResult::parent_failed(no, parent);
                self.reporter.task_failed(no, &self.tasks[&no].name, &result.error);
                failed.insert(no);
                results.insert(no, result);
            }

            if in_flight == 0 && ready.is_empty() && results.len() >= total_pending.len() {
                break;
            }

            if self.quit_early && !failed.is_empty() && in_flight == 0 {
                break;
            }

            while !(self.quit_early && !failed.is_empty()) {
                let Some(task_no) = ready.pop_front() else { break };
                let pool_name = self.pool_for(task_no).to_string();
                let Some(pool) = self.pools.get(&pool_name) else {
                    let result = TaskResult::failure(task_no, format!("no such pool `{pool_name}`"));
                    results.insert(task_no, result);
                    failed.insert(task_no);
                    continue;
                };
                let permit = pool.capacity.clone().acquire_owned().await.expect("pool semaphore never closed");
                in_flight += 1;

                let task = self.tasks[&task_no].clone();
                let tx = tx.clone();
                let reporter = self.reporter.clone();
                reporter.task_started(task_no, &task.name);

                match &pool.kind {
                    PoolKind::Local => {
                        let env = env.clone();
                        tokio::spawn(async move {
                            let result = local::execute(&task, env).await;
                            drop(permit);
                            let _ = tx.send(result).await;
                        });
                    }
                    PoolKind::Grid { client, tmpdir } => {
                        let client = client.clone();
                        let tmpdir = tmpdir.clone();
                        let reporter = reporter.clone();
                        tokio::spawn(async move {
                            let result = crate::grid::worker::execute(&task, client, &tmpdir, reporter.as_ref()).await;
                            drop(permit);
                            let _ = tx.send(result).await;
                        });
                    }
                }
            }

            if in_flight == 0 {
                continue;
            }

            if let Ok(result) = rx.recv().await {
                in_flight -= 1;
                let task_no = result.task_no;
                let task = &self.tasks[&task_no];

                let task_failed = !result.is_success();
                if result.is_success() {
                    self.reporter.task_completed(task_no, &task.name);
                    if let Err(e) = self.save_fingerprints(&result) {
                        log::warn!("failed to persist fingerprint for task {task_no}: {e}");
                    }
                    completed.insert(task_no);
                } else {
                    self.reporter.task_failed(task_no, &task.name, &result.error);
                    failed.insert(task_no);
                }
                results.insert(task_no, result);

                for &dependent in self.dag.successors(task_no).iter() {
                    if let Some(counter) = remaining_deps.get_mut(&dependent) {
                        if *counter > 0 {
                            *counter -= 1;
                        }
                        if *counter == 0 && not_yet_ready.remove(&dependent) {
                            if task_failed {
                                // The parent that just unblocked this task failed,
                                // so it must never be dispatched (spec §4.3):
                                // synthesize the failure directly instead of
                                // queuing it, since the next loop iteration's
                                // `not_yet_ready` scan won't see it anymore.
                                let result = TaskResult::parent_failed(dependent, task_no);
                                self.reporter.task_failed(dependent, &self.tasks[&dependent].name, &result.error);
                                failed.insert(dependent);
                                results.insert(dependent, result);
                            } else {
                                ready.push_back(dependent);
                            }
                        }
                    }
                }
            }
        }

        RunOutcome { completed, failed, results }
    }

    fn save_fingerprints(&self, result: &TaskResult) -> Result<(), crate::backend::BackendError> {
        for (key, compare) in result.dep_keys.iter().zip(result.dep_compares.iter()) {
            self.backend.save(key, compare)?;
        }
        Ok(())
    }
}
