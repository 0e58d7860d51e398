//! Tasks (spec §3): named units of work with declared inputs, declared
//! outputs, and an ordered list of actions.

pub mod state;

use std::fmt;
use std::sync::Arc;

use evalexpr::{ContextWithMutableVariables, HashMapContext};

use crate::engine::error::DagError;
use crate::tracked::{CompareToken, Tracked};
use crate::utils::EnvVar;

pub use state::{Content, Input, Output};

/// A unit of work a task can carry out: `run` is invoked once per action, in
/// order, with an empty `Input` and the workflow's shared `EnvVar` (dagrs's
/// `Action::run` signature, kept verbatim).
pub trait Action: fmt::Debug + Send + Sync {
    fn run(&self, input: Input, env: Arc<EnvVar>) -> Output;
}

#[derive(Clone)]
pub enum ActionUnit {
    Shell(String),
    Callable(Arc<dyn Action>),
}

impl fmt::Debug for ActionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionUnit::Shell(cmd) => f.debug_tuple("Shell").field(cmd).finish(),
            ActionUnit::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// A `time_min`/`mem_mb` value: either a fixed integer or a formula string
/// referencing `depends` (total byte size of file dependencies) and `cores`,
/// evaluated at submission time so memory can scale with input size.
#[derive(Debug, Clone)]
pub enum ResourceValue {
    Fixed(u64),
    Formula(String),
}

impl ResourceValue {
    pub fn parse(input: impl Into<String>) -> Self {
        let s = input.into();
        match s.trim().parse::<u64>() {
            Ok(n) => ResourceValue::Fixed(n),
            Err(_) => ResourceValue::Formula(s),
        }
    }

    pub fn evaluate(&self, depends_bytes: u64, cores: u32) -> u64 {
        match self {
            ResourceValue::Fixed(n) => *n,
            ResourceValue::Formula(expr) => evaluate_formula(expr, depends_bytes, cores),
        }
    }
}

impl From<u64> for ResourceValue {
    fn from(n: u64) -> Self {
        ResourceValue::Fixed(n)
    }
}

impl From<&str> for ResourceValue {
    fn from(s: &str) -> Self {
        ResourceValue::parse(s)
    }
}

fn evaluate_formula(expr: &str, depends_bytes: u64, cores: u32) -> u64 {
    let mut ctx = HashMapContext::new();
    let _ = ctx.set_value("depends".into(), (depends_bytes as i64).into());
    let _ = ctx.set_value("cores".into(), (cores as i64).into());
    evalexpr::eval_int_with_context(expr, &ctx).map(|v| v.max(0) as u64).unwrap_or(0)
}

/// Per-task resource request for the grid pool (spec §4.5).
#[derive(Debug, Clone)]
pub struct GridResourceRequest {
    pub time_min: ResourceValue,
    pub mem_mb: ResourceValue,
    pub cores: u32,
    pub partition: Option<String>,
    pub extra_options: Vec<String>,
}

impl GridResourceRequest {
    pub fn new(time_min: impl Into<ResourceValue>, mem_mb: impl Into<ResourceValue>, cores: u32) -> Self {
        Self { time_min: time_min.into(), mem_mb: mem_mb.into(), cores, partition: None, extra_options: Vec::new() }
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_extra_option(mut self, option: impl Into<String>) -> Self {
        self.extra_options.push(option.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub task_no: u64,
    pub name: String,
    pub actions: Vec<ActionUnit>,
    pub depends: Vec<Tracked>,
    pub targets: Vec<Tracked>,
    pub grid_request: Option<GridResourceRequest>,
}

/// Verifies every declared target exists and, on success, returns the
/// fingerprint keys/compares for every non-alias tracked object in
/// `depends ∪ targets` (spec §4.4: "After all actions succeed, verify every
/// target's `exists()`... On success, compute `compare()` for all depends
/// and targets").
pub fn verify_and_compare(task: &Task) -> Result<(Vec<String>, Vec<Vec<CompareToken>>), String> {
    for target in &task.targets {
        if !target.exists() {
            return Err(format!("target {} not produced", target.key()));
        }
    }

    let mut keys = Vec::new();
    let mut compares = Vec::new();
    for obj in task.depends.iter().chain(task.targets.iter()) {
        if obj.is_task_alias() {
            continue;
        }
        keys.push(obj.key());
        compares.push(obj.compare());
    }
    Ok((keys, compares))
}

/// Explicit task construction, per design note §9 ("offer an explicit
/// builder... same behavior, no reliance on callable-returning-callable").
#[derive(Default)]
pub struct TaskBuilder {
    actions: Vec<ActionUnit>,
    depends: Vec<Tracked>,
    targets: Vec<Tracked>,
    name: Option<String>,
    grid_request: Option<GridResourceRequest>,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn shell(mut self, cmd: impl Into<String>) -> Self {
        self.actions.push(ActionUnit::Shell(cmd.into()));
        self
    }

    pub fn action(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(ActionUnit::Callable(action));
        self
    }

    pub fn depends(mut self, dep: impl Into<Tracked>) -> Self {
        self.depends.push(dep.into());
        self
    }

    pub fn target(mut self, target: impl Into<Tracked>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn grid_request(mut self, request: GridResourceRequest) -> Self {
        self.grid_request = Some(request);
        self
    }

    pub fn into_parts(self) -> (Vec<ActionUnit>, Vec<Tracked>, Vec<Tracked>, Option<String>, Option<GridResourceRequest>) {
        (self.actions, self.depends, self.targets, self.name, self.grid_request)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub task_no: u64,
    pub error: String,
    pub dep_keys: Vec<String>,
    pub dep_compares: Vec<Vec<CompareToken>>,
}

impl TaskResult {
    pub fn success(task_no: u64, dep_keys: Vec<String>, dep_compares: Vec<Vec<CompareToken>>) -> Self {
        Self { task_no, error: String::new(), dep_keys, dep_compares }
    }

    pub fn failure(task_no: u64, error: impl Into<String>) -> Self {
        Self { task_no, error: error.into(), dep_keys: Vec::new(), dep_compares: Vec::new() }
    }

    pub fn parent_failed(task_no: u64, parent: u64) -> Self {
        Self::failure(task_no, format!("parent task {parent} failed"))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

/// Registration-time validation shared by every task-creating entry point.
pub fn check_target_not_alias(targets: &[Tracked]) -> Result<(), DagError> {
    if targets.iter().any(Tracked::is_task_alias) {
        return Err(DagError::TargetIsTask);
    }
    Ok(())
}
