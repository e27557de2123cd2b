//! The job queue.
//!
//! Three lists under one lock: `waiting` (priority sorted), `ready` (admitted,
//! all permits held) and `running`. Jobs submitted ahead of their start time
//! sleep in a scheduled-start waiter task first. An elastic pool of worker
//! tasks drains the ready list, feeds terminated jobs to the reschedule
//! engine, and promotes admissible waiting jobs; idle workers exit after a
//! timeout and are respawned on demand.
//!
//! Lock discipline: the queue lock is never held across an `.await` — not
//! engine execution, not the starvation nap, and not the reschedule pass
//! (which may recurse into [`JobQueue::submit`]). The registry lock nests
//! inside the queue lock, never the other way around.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time;
use tracing::Instrument;

use crate::config::QueueConfig;
use crate::error::{DirectorError, Result};

use super::admission;
use super::engine::{DirectorHooks, JobEngine};
use super::record::{JobId, JobRecord, JobStatus};
use super::registry::ConcurrencyRegistry;
use super::reschedule::{self, Disposition};

/// The three job lists plus worker-pool bookkeeping, all under one lock.
struct QueueState {
    waiting: VecDeque<Arc<JobRecord>>,
    ready: VecDeque<Arc<JobRecord>>,
    running: Vec<Arc<JobRecord>>,
    num_workers: usize,
    quit: bool,
}

impl QueueState {
    fn has_work(&self) -> bool {
        !self.ready.is_empty() || !self.waiting.is_empty()
    }
}

/// Monotonic queue counters.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    /// Accepted submit calls (reschedule resubmissions included)
    pub submitted: u64,
    /// Engine invocations completed
    pub executed: u64,
    /// Jobs requeued by the reschedule engine
    pub rescheduled: u64,
}

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    executed: AtomicU64,
    rescheduled: AtomicU64,
}

/// Point-in-time view of the queue, for status reporting and tests.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    pub waiting: Vec<JobId>,
    pub ready: Vec<JobId>,
    pub running: Vec<JobId>,
    pub num_workers: usize,
}

/// The job queue and admission scheduler.
pub struct JobQueue {
    config: QueueConfig,
    registry: Arc<ConcurrencyRegistry>,
    engine: Arc<dyn JobEngine>,
    hooks: Arc<dyn DirectorHooks>,
    state: Mutex<QueueState>,
    /// Wakes idle workers at shutdown and the destroyer when the last worker
    /// exits.
    work: Notify,
    valid: AtomicBool,
    counters: QueueCounters,
}

impl JobQueue {
    /// Create the queue. One per director; lives until [`shutdown`](Self::shutdown).
    pub fn new(
        config: QueueConfig,
        registry: Arc<ConcurrencyRegistry>,
        engine: Arc<dyn JobEngine>,
        hooks: Arc<dyn DirectorHooks>,
    ) -> Result<Arc<Self>> {
        if config.max_workers == 0 {
            return Err(DirectorError::invalid_config(
                "max_workers must be at least 1",
            ));
        }

        tracing::debug!(max_workers = config.max_workers, "job queue initialized");
        Ok(Arc::new(Self {
            config,
            registry,
            engine,
            hooks,
            state: Mutex::new(QueueState {
                waiting: VecDeque::new(),
                ready: VecDeque::new(),
                running: Vec::new(),
                num_workers: 0,
                quit: false,
            }),
            work: Notify::new(),
            valid: AtomicBool::new(true),
            counters: QueueCounters::default(),
        }))
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn DirectorHooks> {
        &self.hooks
    }

    /// Submit a job.
    ///
    /// A job scheduled in the future is handed to a scheduled-start waiter
    /// and this returns immediately. A canceled job goes to the front of the
    /// ready list so it is disposed of quickly; everything else is inserted
    /// into the waiting list in stable priority order. Either way at least
    /// one worker is guaranteed to be looking at the queue afterwards.
    pub fn submit(self: &Arc<Self>, job: Arc<JobRecord>) -> Result<()> {
        if !self.valid.load(Ordering::Acquire) {
            tracing::error!(job_id = %job.id(), "submit on uninitialized job queue");
            return Err(DirectorError::NotInitialized);
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        let delay = job.sched_time().signed_duration_since(Utc::now());
        if !job.is_canceled() && delay > chrono::Duration::zero() {
            tracing::debug!(
                job_id = %job.id(),
                delay_secs = delay.num_seconds(),
                "deferring job to scheduled-start waiter"
            );
            tokio::spawn(Arc::clone(self).sched_wait(job));
            return Ok(());
        }

        let mut state = self.state.lock();
        if job.is_canceled() {
            tracing::debug!(job_id = %job.id(), "prepending canceled job to ready queue");
            state.ready.push_front(job);
        } else {
            // Stable priority sort: before the first strictly lower-urgency
            // entry, at the tail among equals.
            let position = state
                .waiting
                .iter()
                .position(|queued| queued.priority() > job.priority());
            match position {
                Some(index) => {
                    tracing::debug!(job_id = %job.id(), index, "inserting job into waiting queue");
                    state.waiting.insert(index, job);
                }
                None => {
                    tracing::debug!(job_id = %job.id(), "appending job to waiting queue");
                    state.waiting.push_back(job);
                }
            }
        }
        self.ensure_worker(&mut state);
        Ok(())
    }

    /// Remove a waiting job so it can be canceled quickly.
    ///
    /// Only the waiting list is scanned: ready and running jobs are past the
    /// point of removal and are canceled through their flag instead. The
    /// found job is moved to the front of the ready list, where the next
    /// worker will dispatch it and the engine will observe the canceled flag.
    pub fn remove(self: &Arc<Self>, job: &JobRecord) -> Result<()> {
        if !self.valid.load(Ordering::Acquire) {
            return Err(DirectorError::NotInitialized);
        }

        let mut state = self.state.lock();
        let position = state
            .waiting
            .iter()
            .position(|queued| queued.id() == job.id());
        let Some(position) = position else {
            tracing::debug!(job_id = %job.id(), "remove: job not on waiting queue");
            return Err(DirectorError::JobNotFound(job.id()));
        };
        if let Some(record) = state.waiting.remove(position) {
            tracing::debug!(job_id = %record.id(), "moved removed job to ready queue");
            state.ready.push_front(record);
        }
        self.ensure_worker(&mut state);
        Ok(())
    }

    /// Shut the queue down: wake every worker, wait for all of them to exit,
    /// then drop whatever is still queued. Jobs on the waiting list at this
    /// point are abandoned to their external owners.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return Err(DirectorError::NotInitialized);
        }

        tracing::debug!("job queue shutting down");
        {
            let mut state = self.state.lock();
            state.quit = true;
        }
        self.work.notify_waiters();

        loop {
            let notified = self.work.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock();
                if state.num_workers == 0 {
                    break;
                }
                tracing::debug!(num_workers = state.num_workers, "waiting for workers to exit");
            }
            notified.await;
        }

        let mut state = self.state.lock();
        let abandoned = state.waiting.len();
        if abandoned > 0 {
            tracing::info!(abandoned, "abandoning waiting jobs at shutdown");
        }
        state.waiting.clear();
        state.ready.clear();
        state.running.clear();
        tracing::debug!("job queue shut down");
        Ok(())
    }

    /// Current queue counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            rescheduled: self.counters.rescheduled.load(Ordering::Relaxed),
        }
    }

    /// Point-in-time view of the three lists and the worker count.
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        QueueSnapshot {
            waiting: state.waiting.iter().map(|job| job.id()).collect(),
            ready: state.ready.iter().map(|job| job.id()).collect(),
            running: state.running.iter().map(|job| job.id()).collect(),
            num_workers: state.num_workers,
        }
    }

    /// Scheduled-start waiter: one task per deferred job. Sleeps in bounded
    /// naps so cancellation is observed within one nap, then resubmits.
    /// A pure producer; it never touches the queue lock itself.
    async fn sched_wait(self: Arc<Self>, job: Arc<JobRecord>) {
        job.set_status(JobStatus::WaitStartTime);
        let wait = job.sched_time().signed_duration_since(Utc::now());
        if wait > chrono::Duration::zero() {
            tracing::info!(
                job = %job.name(),
                job_id = %job.id(),
                seconds = wait.num_seconds(),
                "Job waiting for scheduled start time"
            );
        }

        let nap_cap = self.config.sched_nap();
        loop {
            let remaining = job.sched_time().signed_duration_since(Utc::now());
            if remaining <= chrono::Duration::zero() || job.is_canceled() {
                break;
            }
            let nap = remaining.to_std().unwrap_or(Duration::ZERO).min(nap_cap);
            time::sleep(nap).await;
            if job.is_canceled() {
                break;
            }
        }

        tracing::debug!(job_id = %job.id(), "scheduled start time reached");
        if let Err(err) = self.submit(job) {
            tracing::error!(error = %err, "could not enqueue job after scheduled wait");
        }
    }

    /// Spawn a worker unless the pool is already at its bound. Caller holds
    /// the queue lock.
    fn ensure_worker(self: &Arc<Self>, state: &mut QueueState) {
        if state.num_workers < self.config.max_workers {
            state.num_workers += 1;
            tracing::debug!(num_workers = state.num_workers, "spawning queue worker");
            tokio::spawn(Arc::clone(self).worker_loop());
        }
    }

    /// Wait for a wakeup or the idle timeout. Returns true on timeout.
    async fn idle_wait(&self) -> bool {
        let notified = self.work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        {
            let state = self.state.lock();
            if state.quit || state.has_work() {
                return false;
            }
        }
        time::timeout(self.config.idle_timeout(), notified)
            .await
            .is_err()
    }

    /// The worker: drain ready, promote waiting, back off when starved,
    /// exit when idle too long or on shutdown.
    async fn worker_loop(self: Arc<Self>) {
        tracing::debug!("queue worker started");
        let mut timedout = false;
        let mut work = true;

        loop {
            if !work {
                let quit = self.state.lock().quit;
                if !quit && self.idle_wait().await {
                    timedout = true;
                }
            }

            // Run everything on the ready queue. Admitted jobs are executed
            // even during shutdown; the destroyer waits until ready is dry.
            loop {
                let job = {
                    let mut state = self.state.lock();
                    let Some(job) = state.ready.pop_front() else {
                        break;
                    };
                    if !state.ready.is_empty() {
                        // More admitted work behind this one; grow the pool.
                        self.ensure_worker(&mut state);
                    }
                    state.running.push(Arc::clone(&job));
                    job
                };

                tracing::debug!(job_id = %job.id(), "dispatching job to engine");
                let span = tracing::info_span!("job", job_id = %job.id(), job = %job.name());
                self.engine.run(Arc::clone(&job)).instrument(span).await;
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(job_id = %job.id(), status = %job.status(), "engine returned");

                {
                    let mut state = self.state.lock();
                    state.running.retain(|running| running.id() != job.id());
                    // Canceled jobs may reach the engine without permits.
                    if job.take_acquired_permits() {
                        admission::release_permits(&job, &self.registry);
                    }
                }

                match reschedule::evaluate(&self, &job).await {
                    Disposition::Requeued => {
                        self.counters.rescheduled.fetch_add(1, Ordering::Relaxed);
                    }
                    Disposition::Terminal => {
                        tracing::debug!(
                            job_id = %job.id(),
                            status = %job.status(),
                            "job terminated"
                        );
                        job.notify_terminated();
                    }
                }
            }

            self.promote_waiting();

            let starved = {
                let mut state = self.state.lock();
                if state.quit && state.ready.is_empty() {
                    state.num_workers -= 1;
                    if state.num_workers == 0 {
                        // Wake the destroyer.
                        self.work.notify_waiters();
                    }
                    tracing::debug!("queue worker exiting on shutdown");
                    return;
                }
                if state.ready.is_empty() && timedout {
                    state.num_workers -= 1;
                    tracing::debug!("queue worker exiting idle");
                    return;
                }
                work = state.has_work();
                state.ready.is_empty() && !state.waiting.is_empty()
            };

            if starved {
                // Nothing admissible; give terminating peers a window to
                // release their permits before scanning again.
                time::sleep(self.config.starvation_backoff()).await;
                work = self.state.lock().has_work();
            }
        }
    }

    /// Move every admissible waiting job to the ready tail.
    ///
    /// Candidates are scanned in priority-then-FIFO order until the first one
    /// outside the admissible cohort. A candidate that fails on permits stays
    /// put with its wait status set; a canceled candidate is promoted anyway
    /// so it exits promptly through the engine's fast-fail path.
    fn promote_waiting(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.waiting.is_empty() || state.quit {
            return;
        }

        let cohort = admission::select_cohort(&state.running, &state.waiting[0]);
        tracing::debug!(
            priority = cohort.priority,
            mixing = cohort.mixing_allowed,
            "scanning waiting queue"
        );

        let mut index = 0;
        let mut promoted = false;
        while index < state.waiting.len() {
            let job = Arc::clone(&state.waiting[index]);
            if !admission::within_cohort(&job, &cohort) {
                job.set_status(JobStatus::WaitPriority);
                break;
            }

            let admitted = admission::acquire_permits(&job, &self.registry);
            if admitted || job.is_canceled() {
                state.waiting.remove(index);
                if admitted && !job.is_canceled() {
                    job.set_status(JobStatus::Ready);
                }
                tracing::debug!(job_id = %job.id(), "promoted job to ready queue");
                state.ready.push_back(job);
                promoted = true;
            } else {
                tracing::debug!(
                    job_id = %job.id(),
                    status = %job.status(),
                    "job held back by resource limits"
                );
                index += 1;
            }
        }

        if promoted {
            self.ensure_worker(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::jobs::record::JobType;
    use async_trait::async_trait;

    struct NoopEngine;

    #[async_trait]
    impl JobEngine for NoopEngine {
        async fn run(&self, job: Arc<JobRecord>) {
            job.set_status(JobStatus::TerminatedOk);
        }
    }

    struct NoopHooks;

    #[async_trait]
    impl DirectorHooks for NoopHooks {
        async fn run_job(&self, _job: Arc<JobRecord>) {}
    }

    fn queue(max_workers: usize) -> Result<Arc<JobQueue>> {
        JobQueue::new(
            QueueConfig::with_max_workers(max_workers),
            Arc::new(ConcurrencyRegistry::new()),
            Arc::new(NoopEngine),
            Arc::new(NoopHooks),
        )
    }

    #[test]
    fn test_new_rejects_zero_workers() {
        assert!(matches!(
            queue(0),
            Err(DirectorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_new_queue_is_empty() {
        let queue = queue(4).unwrap();
        let snapshot = queue.snapshot();
        assert!(snapshot.waiting.is_empty());
        assert!(snapshot.ready.is_empty());
        assert!(snapshot.running.is_empty());
        assert_eq!(snapshot.num_workers, 0);

        let stats = queue.stats();
        assert_eq!(stats.submitted, 0);
        assert_eq!(stats.executed, 0);
        assert_eq!(stats.rescheduled, 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_job_is_not_found() {
        let queue = queue(1).unwrap();
        let job = JobRecord::new("solo", JobType::Backup, Arc::new(JobConfig::new("solo")));
        assert!(matches!(
            queue.remove(&job),
            Err(DirectorError::JobNotFound(_))
        ));
    }
}
