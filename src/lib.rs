//! anadama: a dependency-aware workflow engine for reproducible computational
//! pipelines, built around a task DAG, change-tracked inputs/outputs, and a
//! local/grid worker split (see [`engine::Workflow`]).

pub mod backend;
pub mod engine;
pub mod grid;
pub mod reporter;
pub mod runner;
pub mod task;
pub mod tracked;
pub mod utils;

mod error;

pub use anadama_derive::Action;
pub use engine::{GridPowerup, RunOptions, RunSummary, Workflow, WorkflowOptions};
pub use error::Error;
pub use task::{Action, ActionUnit, GridResourceRequest, Task, TaskBuilder, TaskResult};
pub use tracked::Tracked;
