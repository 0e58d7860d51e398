//! Top-level crate error, composing the registration and backend layers.

use thiserror::Error;

use crate::backend::BackendError;
use crate::engine::error::DagError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registration(#[from] DagError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{failed_count} task(s) failed")]
    RunFailed { failed_count: usize },
}
