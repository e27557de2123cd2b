//! External collaborator traits.
//!
//! The queue schedules jobs; it does not run them and it does not own the
//! catalog. Both sides of that boundary are traits the embedding daemon
//! implements.

use async_trait::async_trait;
use std::sync::Arc;

use super::record::{JobRecord, JobStatus};

/// The job execution routine.
///
/// Runs a job to a terminal state: the network conversations with file and
/// storage daemons, catalog updates and volume management all live behind
/// this trait. The implementation must set the record's final status before
/// returning and must poll [`JobRecord::is_canceled`] to honor cooperative
/// cancellation — a canceled job that reaches the engine (the fast-fail path)
/// is expected to terminate immediately.
#[async_trait]
pub trait JobEngine: Send + Sync {
    async fn run(&self, job: Arc<JobRecord>);
}

/// Director-side lifecycle hooks consulted by the reschedule engine.
#[async_trait]
pub trait DirectorHooks: Send + Sync {
    /// Duplicate-job policy oracle. A reschedule that this denies is
    /// abandoned and the job terminates as it stands.
    fn allow_duplicate_job(&self, _job: &JobRecord) -> bool {
        true
    }

    /// Update the catalog job-end record. Called on the in-place reschedule
    /// path before the job is resubmitted.
    fn update_job_end(&self, _job: &JobRecord, _status: JobStatus) {}

    /// Drop per-run pointers on a record that is about to be reused.
    fn release_job_pointers(&self, _job: &JobRecord) {}

    /// Start a freshly cloned successor job. The implementation is expected
    /// to take the clone through the normal run path, which ends in
    /// [`JobQueue::submit`](super::queue::JobQueue::submit).
    async fn run_job(&self, job: Arc<JobRecord>);
}
