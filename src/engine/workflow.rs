//! The workflow / DAG builder (spec §4.1), grounded directly on
//! `anadama/workflow.py`'s `Workflow` class: `add_task`/`_add_task` (the
//! five-way dependency resolution order and deferred target-linking),
//! `do`/`_parse_wrapper`/`discover_binaries`, `already_exists`, and `go`
//! (execution-order planning + `_filter_skipped_tasks`).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backend::{self, FingerprintBackend};
use crate::engine::error::DagError;
use crate::engine::graph::Graph;
use crate::grid::queue::GridQueue;
use crate::reporter::{ConsoleReporter, Reporter};
use crate::runner::dry::DryRunner;
use crate::runner::{Pool, PoolKind, RunOutcome, Runner};
use crate::task::{check_target_not_alias, ActionUnit, GridResourceRequest, Task, TaskBuilder, TaskResult};
use crate::tracked::{DependencyIndex, Tracked, TrackedExecutable, TrackedVariable};
use crate::utils::matcher;
use crate::utils::Configuration;
use crate::Error;

/// Supplies a grid queue client and the pool name grid tasks route to
/// (spec §6: `grid_powerup`).
pub struct GridPowerup {
    pub pool_name: String,
    pub queue: Arc<dyn GridQueue>,
    pub tmpdir: PathBuf,
}

pub struct WorkflowOptions {
    pub storage_backend: Option<Arc<dyn FingerprintBackend>>,
    pub strict: bool,
    pub grid_powerup: Option<GridPowerup>,
    pub vars: Configuration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self { storage_backend: None, strict: false, grid_powerup: None, vars: Configuration::from_env() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_them_all: bool,
    pub quit_early: bool,
    pub n_parallel: usize,
    pub n_grid_parallel: usize,
    pub until_task: Option<String>,
    pub dry_run: bool,
    pub reporter: Option<Arc<dyn Reporter>>,
}

pub struct RunSummary {
    pub completed: HashSet<u64>,
    pub failed: HashSet<u64>,
    pub results: HashMap<u64, TaskResult>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Workflow {
    next_task_no: u64,
    tasks: Vec<Arc<Task>>,
    names: HashSet<String>,
    dag: Graph,
    depidx: DependencyIndex,
    backend: Arc<dyn FingerprintBackend>,
    strict: bool,
    grid_powerup: Option<GridPowerup>,
    vars: Configuration,
    completed_tasks: HashSet<u64>,
    failed_tasks: HashSet<u64>,
    task_results: HashMap<u64, TaskResult>,
}

impl Workflow {
    pub fn new(options: WorkflowOptions) -> Self {
        let backend = options.storage_backend.unwrap_or_else(|| match &options.vars.backend_dir {
            Some(dir) => backend::SledBackend::open(dir)
                .map(|b| Arc::new(b) as Arc<dyn FingerprintBackend>)
                .unwrap_or_else(|e| {
                    log::warn!("falling back to the default backend: {e}");
                    backend::default_backend()
                }),
            None => backend::default_backend(),
        });

        Self {
            next_task_no: 0,
            tasks: Vec::new(),
            names: HashSet::new(),
            dag: Graph::new(),
            depidx: DependencyIndex::new(),
            backend,
            strict: options.strict,
            grid_powerup: options.grid_powerup,
            vars: options.vars,
            completed_tasks: HashSet::new(),
            failed_tasks: HashSet::new(),
            task_results: HashMap::new(),
        }
    }

    pub fn vars(&self) -> &Configuration {
        &self.vars
    }

    pub fn completed_tasks(&self) -> &HashSet<u64> {
        &self.completed_tasks
    }

    pub fn failed_tasks(&self) -> &HashSet<u64> {
        &self.failed_tasks
    }

    pub fn task_results(&self) -> &HashMap<u64, TaskResult> {
        &self.task_results
    }

    pub fn add_task(
        &mut self,
        actions: Vec<ActionUnit>,
        depends: Vec<Tracked>,
        targets: Vec<Tracked>,
        name: Option<String>,
    ) -> Result<Arc<Task>, DagError> {
        self.add_task_with_grid(actions, depends, targets, name, None)
    }

    pub fn add_task_with_grid(
        &mut self,
        actions: Vec<ActionUnit>,
        depends: Vec<Tracked>,
        targets: Vec<Tracked>,
        name: Option<String>,
        grid_request: Option<GridResourceRequest>,
    ) -> Result<Arc<Task>, DagError> {
        check_target_not_alias(&targets)?;

        let task_no = self.next_task_no;
        let name = name.unwrap_or_else(|| format!("Step {task_no}"));
        if self.names.contains(&name) {
            return Err(DagError::DuplicateTaskName(name));
        }

        self.dag.add_node(task_no);

        for dep in &depends {
            if let Err(err) = self.link_dependency(task_no, dep) {
                self.dag.remove_last_node(task_no);
                return Err(err);
            }
        }

        let task = Arc::new(Task { task_no, name: name.clone(), actions, depends, targets, grid_request });

        for target in &task.targets {
            self.depidx.link(target.key(), Some(task.clone()));
        }

        self.tasks.push(task.clone());
        self.names.insert(name);
        self.next_task_no += 1;
        Ok(task)
    }

    /// Registers a task built with [`TaskBuilder`].
    pub fn add_built_task(&mut self, builder: TaskBuilder) -> Result<Arc<Task>, DagError> {
        let (actions, depends, targets, name, grid_request) = builder.into_parts();
        self.add_task_with_grid(actions, depends, targets, name, grid_request)
    }

    fn link_dependency(&mut self, task_no: u64, dep: &Tracked) -> Result<(), DagError> {
        if let Some(parent) = dep.task_no() {
            self.link_edge(parent, task_no);
            return Ok(());
        }

        let key = dep.key();
        match self.depidx.get(&key) {
            Some(Some(producer)) => {
                self.link_edge(producer.task_no, task_no);
                Ok(())
            }
            Some(None) => Ok(()),
            None => {
                if !dep.must_preexist() {
                    Ok(())
                } else if !self.strict && dep.exists() {
                    self.depidx.link(key, None);
                    Ok(())
                } else {
                    let suggestion = matcher::suggest(&key, self.depidx.keys());
                    Err(DagError::UnknownDependency { key, suggestion })
                }
            }
        }
    }

    fn link_edge(&mut self, parent_no: u64, child_no: u64) {
        let parent_idx = self.dag.find_index_by_id(&parent_no).expect("parent task registered");
        let child_idx = self.dag.find_index_by_id(&child_no).expect("child task just registered");
        self.dag.add_edge(parent_idx, child_idx);
    }

    /// Registers pre-existing tracked objects as produced by a no-op task
    /// (spec §4.1: `AlreadyExists`).
    pub fn already_exists(&mut self, objects: Vec<Tracked>) -> Result<Arc<Task>, DagError> {
        let task_no = self.next_task_no;
        self.add_task(Vec::new(), Vec::new(), objects, Some(format!("Track pre-existing dependencies #{task_no}")))
    }

    /// Shell-command sugar (spec §4.1: `Do`).
    pub fn do_(&mut self, cmd: &str) -> Result<Arc<Task>, DagError> {
        self.do_with_options(cmd, true, true)
    }

    pub fn do_with_options(&mut self, cmd: &str, track_cmd: bool, track_binaries: bool) -> Result<Arc<Task>, DagError> {
        let targets: Vec<Tracked> = parse_wrapper(cmd, '@').into_iter().map(Tracked::from).collect();
        let mut depends: Vec<Tracked> = parse_wrapper(cmd, '#').into_iter().map(Tracked::from).collect();
        let stripped = strip_markers(cmd);

        if track_binaries {
            let preexisting: Vec<Tracked> =
                discover_binaries(&stripped).into_iter().map(|e| Tracked::Executable(Arc::new(e))).collect();
            if !preexisting.is_empty() {
                self.already_exists(preexisting.clone())?;
                depends.extend(preexisting);
            }
        }

        if track_cmd {
            depends.push(Tracked::Variable(Arc::new(TrackedVariable::new(
                format!("anadama:cmd:{}", self.next_task_no),
                stripped.clone(),
            ))));
        }

        let name = stripped.clone();
        self.add_task(vec![ActionUnit::Shell(stripped)], depends, targets, Some(name))
    }

    /// Runs the workflow (spec §4.1 execution-order planning, §4.2 skip
    /// filter, §4.3 dispatch loop).
    pub async fn run(&mut self, opts: RunOptions) -> Result<RunSummary, Error> {
        let reporter = opts.reporter.clone().unwrap_or_else(|| Arc::new(ConsoleReporter));
        reporter.started();

        let order = self.dag.topo_sort().ok_or(DagError::LoopGraph)?;
        let mut task_nos = order;

        if let Some(until) = &opts.until_task {
            let target = self
                .tasks
                .iter()
                .find(|t| &t.name == until)
                .ok_or_else(|| DagError::RelyTaskIllegal(until.clone()))?;
            let ancestors = self.dag.ancestors_inclusive(target.task_no);
            task_nos.retain(|n| ancestors.contains(n));
        }

        let run_them_all = opts.run_them_all || self.vars.run_them_all;
        let (to_run, skipped) =
            if run_them_all { (task_nos.clone(), Vec::new()) } else { self.filter_skippable(&task_nos)? };

        for &task_no in &skipped {
            reporter.task_skipped(task_no);
        }

        let mut completed: HashSet<u64> = skipped.into_iter().collect();
        let pending: VecDeque<u64> = to_run.into();

        let dry_run = opts.dry_run || self.vars.dry_run;
        let outcome = if dry_run {
            DryRunner { reporter: reporter.clone() }.run(pending, completed)
        } else {
            let runner = self.build_runner(&opts, reporter.clone());
            runner.run(pending, std::mem::take(&mut completed)).await
        };

        self.absorb(outcome, &reporter)
    }

    fn absorb(&mut self, outcome: RunOutcome, reporter: &Arc<dyn Reporter>) -> Result<RunSummary, Error> {
        self.completed_tasks.extend(outcome.completed.iter().copied());
        self.failed_tasks.extend(outcome.failed.iter().copied());
        self.task_results.extend(outcome.results.clone());

        reporter.finished();

        let summary = RunSummary { completed: outcome.completed, failed: outcome.failed, results: outcome.results };
        if !summary.is_success() {
            return Err(Error::RunFailed { failed_count: summary.failed.len() });
        }
        Ok(summary)
    }

    fn build_runner(&self, opts: &RunOptions, reporter: Arc<dyn Reporter>) -> Runner {
        let n_parallel = if opts.n_parallel > 0 { opts.n_parallel } else { self.vars.n_parallel.unwrap_or(1) }.max(1);

        let mut pools = HashMap::new();
        pools.insert(
            "local".to_string(),
            Pool { kind: PoolKind::Local, capacity: Arc::new(tokio::sync::Semaphore::new(n_parallel)) },
        );

        let mut routes = HashMap::new();
        let default_pool = "local".to_string();

        if let Some(gp) = &self.grid_powerup {
            let n_grid = if opts.n_grid_parallel > 0 {
                opts.n_grid_parallel
            } else {
                self.vars.n_grid_parallel.unwrap_or(1)
            }
            .max(1);
            pools.insert(
                gp.pool_name.clone(),
                Pool {
                    kind: PoolKind::Grid {
                        client: Arc::new(crate::grid::queue::QueueClient::new(gp.queue.clone())),
                        tmpdir: gp.tmpdir.clone(),
                    },
                    capacity: Arc::new(tokio::sync::Semaphore::new(n_grid)),
                },
            );
            for task in &self.tasks {
                if task.grid_request.is_some() {
                    routes.insert(task.task_no, gp.pool_name.clone());
                }
            }
        }

        Runner {
            tasks: self.tasks.iter().map(|t| (t.task_no, t.clone())).collect(),
            dag: Arc::new(clone_graph_view(&self.dag)),
            backend: self.backend.clone(),
            reporter,
            pools,
            default_pool,
            routes,
            quit_early: opts.quit_early || self.vars.quit_early,
        }
    }

    /// Change-tracker / skip filter (spec §4.2).
    fn filter_skippable(&self, task_nos: &[u64]) -> Result<(Vec<u64>, Vec<u64>), Error> {
        let mut must_run: HashSet<u64> = HashSet::new();
        let by_no: HashMap<u64, &Arc<Task>> = self.tasks.iter().map(|t| (t.task_no, t)).collect();

        for &no in task_nos {
            let task = by_no[&no];
            if task.targets.is_empty() && task.depends.is_empty() {
                must_run.insert(no);
            }
        }

        let mut groups: HashMap<String, (Tracked, HashSet<u64>)> = HashMap::new();
        for &no in task_nos {
            let task = by_no[&no];
            for obj in task.depends.iter().chain(task.targets.iter()) {
                if obj.is_task_alias() {
                    continue;
                }
                groups.entry(obj.key()).or_insert_with(|| (obj.clone(), HashSet::new())).1.insert(no);
            }
        }

        for (key, (tracked, members)) in &groups {
            let current = tracked.compare();
            let stored = self.backend.lookup(key).map_err(Error::Backend)?;
            let changed = stored.as_ref() != Some(&current);
            if changed {
                must_run.extend(members.iter().copied());
            }
        }

        // Single forward pass: task_nos is topologically ordered with
        // producers before consumers, so a parent's must-run status is
        // already decided by the time its children are visited.
        for &no in task_nos {
            if must_run.contains(&no) {
                continue;
            }
            if self.dag.predecessors(no).iter().any(|p| must_run.contains(p)) {
                must_run.insert(no);
            }
        }

        let mut to_run = Vec::new();
        let mut skipped = Vec::new();
        for &no in task_nos {
            if must_run.contains(&no) {
                to_run.push(no);
            } else {
                skipped.push(no);
            }
        }
        Ok((to_run, skipped))
    }
}

/// Snapshot the parts of `Graph` the runner needs for read-only predecessor
/// lookups once the DAG is frozen for `run`.
fn clone_graph_view(dag: &Graph) -> Graph {
    // `Graph` holds only plain data (no interior mutability), so a value
    // clone is a correct, cheap-enough frozen view for one run.
    let mut clone = Graph::new();
    for i in 0.. {
        let Some(id) = dag.find_id_by_index(i) else { break };
        clone.add_node(id);
    }
    for i in 0.. {
        let Some(id) = dag.find_id_by_index(i) else { break };
        for parent in dag.predecessors(id) {
            let pi = clone.find_index_by_id(&parent).unwrap();
            let ci = clone.find_index_by_id(&id).unwrap();
            clone.add_edge(pi, ci);
        }
    }
    clone
}

static MARKER_RE_CACHE: Lazy<std::sync::Mutex<HashMap<char, Regex>>> =
    Lazy::new(|| std::sync::Mutex::new(HashMap::new()));

fn marker_regex(metachar: char) -> Regex {
    let mut cache = MARKER_RE_CACHE.lock().unwrap();
    cache
        .entry(metachar)
        .or_insert_with(|| Regex::new(&format!(r"\{metachar}\{{([^{{}}]+)\}}")).expect("valid marker regex"))
        .clone()
}

fn parse_wrapper(cmd: &str, metachar: char) -> Vec<String> {
    marker_regex(metachar).captures_iter(cmd).map(|c| c[1].to_string()).collect()
}

static STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[@#]\{([^{}]+)\}").expect("valid strip regex"));

fn strip_markers(cmd: &str) -> String {
    STRIP_RE.replace_all(cmd, "$1").to_string()
}

/// Tokenizes a shell command and resolves each token against the filesystem
/// or `PATH`, keeping small (<1MiB) executable files (spec §4.1: `Do`,
/// binary-tracking).
fn discover_binaries(cmd: &str) -> Vec<TrackedExecutable> {
    let mut found = Vec::new();
    let Some(tokens) = shlex::split(cmd) else { return found };

    for token in tokens {
        let path = resolve_binary_token(&token);
        let Some(path) = path else { continue };
        let Ok(meta) = std::fs::metadata(&path) else { continue };
        if !meta.is_file() || meta.len() >= 1 << 20 {
            continue;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                continue;
            }
        }
        found.push(TrackedExecutable::new(path));
    }
    found
}

fn resolve_binary_token(token: &str) -> Option<PathBuf> {
    let direct = Path::new(token);
    if direct.exists() {
        return Some(direct.to_path_buf());
    }
    which::which(token).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_and_dependency_markers() {
        let cmd = "cp #{in.txt} @{out.txt}";
        assert_eq!(parse_wrapper(cmd, '#'), vec!["in.txt".to_string()]);
        assert_eq!(parse_wrapper(cmd, '@'), vec!["out.txt".to_string()]);
        assert_eq!(strip_markers(cmd), "cp in.txt out.txt");
    }

    #[test]
    fn add_task_rejects_task_alias_target() {
        let mut wf = Workflow::new(WorkflowOptions {
            storage_backend: Some(crate::backend::memory_backend()),
            ..WorkflowOptions::default()
        });
        let upstream = wf.add_task(Vec::new(), Vec::new(), Vec::new(), Some("upstream".into())).unwrap();
        let err = wf
            .add_task(Vec::new(), Vec::new(), vec![Tracked::from(upstream)], Some("downstream".into()))
            .unwrap_err();
        assert!(matches!(err, DagError::TargetIsTask));
    }

    #[test]
    fn add_task_rejects_duplicate_names() {
        let mut wf = Workflow::new(WorkflowOptions {
            storage_backend: Some(crate::backend::memory_backend()),
            ..WorkflowOptions::default()
        });
        wf.add_task(Vec::new(), Vec::new(), Vec::new(), Some("a".into())).unwrap();
        let err = wf.add_task(Vec::new(), Vec::new(), Vec::new(), Some("a".into())).unwrap_err();
        assert!(matches!(err, DagError::DuplicateTaskName(_)));
    }

    #[test]
    fn unknown_strict_dependency_suggests_closest_key() {
        let mut wf = Workflow::new(WorkflowOptions {
            storage_backend: Some(crate::backend::memory_backend()),
            strict: true,
            ..WorkflowOptions::default()
        });
        wf.add_task(Vec::new(), Vec::new(), vec![Tracked::from("input.txt")], Some("producer".into())).unwrap();
        let err = wf
            .add_task(Vec::new(), vec![Tracked::from("imput.txt")], Vec::new(), Some("consumer".into()))
            .unwrap_err();
        match err {
            DagError::UnknownDependency { key, suggestion } => {
                assert_eq!(key, "imput.txt");
                assert_eq!(suggestion.as_deref(), Some("input.txt"));
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }
}
