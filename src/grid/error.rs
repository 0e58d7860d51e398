//! Grid/batch-scheduler errors (spec §4.5, §7).

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum GridError {
    #[error("Unable to submit job to queue")]
    SubmissionFailed,
    #[error("Return Code Error: {0}")]
    ReturnCode(String),
    #[error("Grid Status Error: {0}")]
    StatusError(String),
    #[error("Unable to decode task result")]
    DecodeFailure,
    #[error("failed to query scheduler: {0}")]
    QueryFailed(String),
    #[error("failed to write grid script: {0}")]
    ScriptIo(String),
}
