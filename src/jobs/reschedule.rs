//! Reschedule engine.
//!
//! After the engine returns, a failed or incomplete backup may get another
//! attempt. Two disposition modes exist: if the run produced no output the
//! record itself is resubmitted (same job id), otherwise a clone is created
//! so the catalog rows written under the original id stay consistent, and the
//! clone is handed to the director's run entry point.

use chrono::Utc;
use std::sync::Arc;

use super::queue::JobQueue;
use super::record::{JobLevel, JobRecord, JobStatus};

/// What the worker should do with the record after the reschedule pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// The job was requeued (in place or as a clone); skip terminal disposal.
    Requeued,
    /// No reschedule; dispose of the job.
    Terminal,
}

/// Reschedule policy gate.
///
/// A job qualifies when attempts remain under the definition's cap
/// (`reschedule_times == 0` is unlimited) and either incomplete-backup or
/// on-error rescheduling applies. Only backups are ever requeued, canceled
/// jobs never are, and base-level backups cannot resume from incomplete.
pub(crate) fn is_reschedule_candidate(job: &JobRecord) -> bool {
    let config = job.job_config();
    if config.reschedule_times > 0 && job.reschedule_count() >= config.reschedule_times {
        return false;
    }

    let status = job.status();
    let incomplete = config.reschedule_incomplete_jobs
        && status == JobStatus::Incomplete
        && job.job_type().is_backup()
        && job.level() != JobLevel::Base;
    let failed = config.reschedule_on_error
        && status != JobStatus::TerminatedOk
        && status != JobStatus::Canceled
        && job.job_type().is_backup();

    incomplete || failed
}

/// Run the reschedule pass for a job the engine just finished.
///
/// Called by the worker with no queue lock held: the in-place path recurses
/// into `submit`, and the clone path awaits the external run entry point.
pub(crate) async fn evaluate(queue: &Arc<JobQueue>, job: &Arc<JobRecord>) -> Disposition {
    if !is_reschedule_candidate(job) {
        return Disposition::Terminal;
    }

    let interval = job.job_config().reschedule_interval();
    let count = job.inc_reschedule_count();
    job.set_sched_time(Utc::now() + interval);
    tracing::info!(
        job = %job.name(),
        job_id = %job.id(),
        attempt = count,
        interval_secs = interval.num_seconds(),
        "Rescheduled job to re-run"
    );

    queue.hooks().release_job_pointers(job);
    job.clear_errors();

    if !queue.hooks().allow_duplicate_job(job) {
        tracing::debug!(job = %job.name(), "duplicate-job policy vetoed reschedule");
        return Disposition::Terminal;
    }

    if job.job_bytes() == 0 {
        // Nothing was written, the job id can be reused.
        job.set_status(JobStatus::WaitStartTime);
        queue.hooks().update_job_end(job, JobStatus::WaitStartTime);
        tracing::debug!(job_id = %job.id(), "requeueing job on the same record");
        if let Err(err) = queue.submit(Arc::clone(job)) {
            tracing::error!(job_id = %job.id(), error = %err, "requeue after reschedule failed");
        }
    } else {
        // Output exists under the original job id; run the retry as a new
        // job so the catalog rows do not collide.
        job.set_status(JobStatus::WaitStartTime);
        let clone = Arc::new(job.clone_for_reschedule());
        tracing::debug!(
            job_id = %job.id(),
            clone_id = %clone.id(),
            "rescheduling as a new job, original wrote data"
        );
        queue.hooks().run_job(clone).await;
    }

    Disposition::Requeued
}
