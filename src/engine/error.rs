//! Registration-time errors (spec §7), extending dagrs's own `DagError`
//! (`LoopGraph`, `RelyTaskIllegal`, `EmptyJob`) with the kinds anadama's
//! workflow builder needs.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("dependency graph contains a cycle")]
    LoopGraph,
    #[error("task `{0}` depends on a task that does not exist in the graph")]
    RelyTaskIllegal(String),
    #[error("workflow has no tasks to run")]
    EmptyJob,
    #[error("duplicate task name `{0}`")]
    DuplicateTaskName(String),
    #[error("unknown dependency `{key}`{}", suggestion.as_ref().map(|s| format!(", did you mean `{s}`?")).unwrap_or_default())]
    UnknownDependency { key: String, suggestion: Option<String> },
    #[error("a task target cannot itself be a task alias")]
    TargetIsTask,
}
