//! Error handling for the director core.
//!
//! The queue distinguishes structural errors, which are surfaced synchronously
//! to the caller, from transient resource conflicts, which are never errors at
//! all: a job that cannot acquire its concurrency permits simply stays on the
//! waiting queue with a wait status recorded on the record itself.

use thiserror::Error;

use crate::jobs::record::JobId;

/// A specialized Result type for director-core operations.
pub type Result<T> = std::result::Result<T, DirectorError>;

/// Errors surfaced by the job queue and its collaborators.
#[derive(Error, Debug)]
pub enum DirectorError {
    /// The queue is not between `new` and `shutdown`; no operation is valid.
    #[error("job queue is not initialized")]
    NotInitialized,

    /// `remove` did not find the job on the waiting queue. Jobs that are
    /// already ready or running are canceled through their canceled flag
    /// instead of being removed.
    #[error("job {0} is not on the waiting queue")]
    JobNotFound(JobId),

    /// Rejected configuration, e.g. a worker pool bounded at zero.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl DirectorError {
    /// Shorthand for an `InvalidConfiguration` error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}
