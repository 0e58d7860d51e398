//! The dependency graph and workflow builder (spec §3, §4.1).

pub mod error;
pub mod graph;
pub mod workflow;

pub use error::DagError;
pub use workflow::{GridPowerup, RunOptions, RunSummary, Workflow, WorkflowOptions};
