//! Grid/batch-scheduler submission (spec §4.5): a scheduler-agnostic
//! submission pipeline plus SLURM and LSF adapters.

pub mod error;
pub mod lsf;
pub mod queue;
pub mod script;
pub mod slurm;
pub mod worker;

pub use error::GridError;
pub use lsf::LsfQueue;
pub use queue::{GridQueue, QueueClient, QueueStatus};
pub use slurm::SlurmQueue;
