//! Job control records.
//!
//! A [`JobRecord`] is the per-job state bag the queue schedules over. It is
//! shared as an `Arc` between the submitter, the scheduled-start waiter, and
//! the worker executing it; whoever drops the last handle disposes of it.
//!
//! Mutable scheduling state lives behind the record's own lock; the canceled
//! flag is a lock-free atomic so any task can poll it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::config::{ClientConfig, JobConfig, PoolOverrides, StorageConfig};

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Backup,
    Restore,
    Verify,
    Admin,
    Migrate,
    Copy,
    Consolidate,
}

impl JobType {
    /// Only backups are ever rescheduled.
    pub fn is_backup(&self) -> bool {
        matches!(self, Self::Backup)
    }

    /// Migration, copy and consolidation jobs never talk to the client, so
    /// they are exempt from client concurrency accounting.
    pub fn skips_client_concurrency(&self) -> bool {
        matches!(self, Self::Migrate | Self::Copy | Self::Consolidate)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
            Self::Verify => "verify",
            Self::Admin => "admin",
            Self::Migrate => "migrate",
            Self::Copy => "copy",
            Self::Consolidate => "consolidate",
        };
        write!(f, "{name}")
    }
}

/// Backup level of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLevel {
    #[default]
    Full,
    Incremental,
    Differential,
    Base,
}

/// Status of a job as seen by the queue.
///
/// The queue itself only writes the wait statuses, `Ready`, and `Canceled`;
/// `Running` and the terminal statuses are the execution engine's
/// responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet submitted
    Created,
    /// Waiting for its scheduled start time
    WaitStartTime,
    /// Waiting for the running priority cohort to drain
    WaitPriority,
    /// Waiting for a client concurrency permit
    WaitClientRes,
    /// Waiting for a storage concurrency permit
    WaitStoreRes,
    /// Waiting for a job-definition concurrency permit
    WaitJobRes,
    /// Admitted; all permits held, waiting for a worker
    Ready,
    /// Being executed by the engine
    Running,
    /// Canceled by an operator
    Canceled,
    /// Terminated in error
    ErrorTerminated,
    /// Stopped before completing; may be resumed by a reschedule
    Incomplete,
    /// Terminated normally
    TerminatedOk,
}

impl JobStatus {
    /// True for statuses a job cannot leave on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::ErrorTerminated | Self::Incomplete | Self::TerminatedOk
        )
    }

    /// True for the wait statuses recorded while a job sits on the waiting
    /// queue.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::WaitStartTime
                | Self::WaitPriority
                | Self::WaitClientRes
                | Self::WaitStoreRes
                | Self::WaitJobRes
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::WaitStartTime => "wait_start_time",
            Self::WaitPriority => "wait_priority",
            Self::WaitClientRes => "wait_client_res",
            Self::WaitStoreRes => "wait_store_res",
            Self::WaitJobRes => "wait_job_res",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Canceled => "canceled",
            Self::ErrorTerminated => "error_terminated",
            Self::Incomplete => "incomplete",
            Self::TerminatedOk => "terminated_ok",
        };
        write!(f, "{name}")
    }
}

/// Mutable per-job state, guarded by the record's own lock.
#[derive(Debug)]
struct JobState {
    status: JobStatus,
    level: JobLevel,
    priority: u32,
    sched_time: DateTime<Utc>,
    initial_sched_time: DateTime<Utc>,
    reschedule_count: u32,
    job_bytes: u64,
    job_errors: u32,
    acquired_permits: bool,
    ignore_client_concurrency: bool,
    ignore_storage_concurrency: bool,
}

/// The job control record.
pub struct JobRecord {
    id: JobId,
    name: String,
    job_type: JobType,
    /// For migrate/copy/consolidate: the job being migrated. `None` marks the
    /// control variant, which touches no storage.
    migrate_job_id: Option<JobId>,
    job: Arc<JobConfig>,
    client: Option<Arc<ClientConfig>>,
    read_storage: Option<Arc<StorageConfig>>,
    write_storage: Option<Arc<StorageConfig>>,
    messages: Option<String>,
    spool_data: bool,
    pools: PoolOverrides,
    canceled: AtomicBool,
    term: Notify,
    state: Mutex<JobState>,
}

impl JobRecord {
    /// Create a record for the given definition. Priority, level and spool
    /// flag default from the definition; the scheduled time defaults to now.
    pub fn new(name: impl Into<String>, job_type: JobType, job: Arc<JobConfig>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            name: name.into(),
            job_type,
            migrate_job_id: None,
            client: None,
            read_storage: None,
            write_storage: None,
            messages: None,
            spool_data: job.spool_data,
            pools: PoolOverrides::default(),
            canceled: AtomicBool::new(false),
            term: Notify::new(),
            state: Mutex::new(JobState {
                status: JobStatus::Created,
                level: JobLevel::default(),
                priority: job.priority,
                sched_time: now,
                initial_sched_time: now,
                reschedule_count: 0,
                job_bytes: 0,
                job_errors: 0,
                acquired_permits: false,
                ignore_client_concurrency: false,
                ignore_storage_concurrency: false,
            }),
            job,
        }
    }

    /// Attach the client this job reads from or writes to.
    pub fn with_client(mut self, client: Arc<ClientConfig>) -> Self {
        self.client = Some(client);
        self
    }

    /// Attach the storage this job reads from.
    pub fn with_read_storage(mut self, storage: Arc<StorageConfig>) -> Self {
        self.read_storage = Some(storage);
        self
    }

    /// Attach the storage this job writes to.
    pub fn with_write_storage(mut self, storage: Arc<StorageConfig>) -> Self {
        self.write_storage = Some(storage);
        self
    }

    /// Override the priority inherited from the job definition.
    pub fn with_priority(self, priority: u32) -> Self {
        self.state.lock().priority = priority;
        self
    }

    /// Set the backup level.
    pub fn with_level(self, level: JobLevel) -> Self {
        self.state.lock().level = level;
        self
    }

    /// Set the messages destination.
    pub fn with_messages(mut self, messages: impl Into<String>) -> Self {
        self.messages = Some(messages.into());
        self
    }

    /// Set pool overrides.
    pub fn with_pools(mut self, pools: PoolOverrides) -> Self {
        self.pools = pools;
        self
    }

    /// Mark this as a data-moving migrate/copy job for the given source job.
    pub fn with_migrate_job(mut self, id: JobId) -> Self {
        self.migrate_job_id = Some(id);
        self
    }

    /// Schedule the job for a future start time.
    pub fn scheduled_at(self, at: DateTime<Utc>) -> Self {
        {
            let mut state = self.state.lock();
            state.sched_time = at;
            state.initial_sched_time = at;
        }
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn migrate_job_id(&self) -> Option<JobId> {
        self.migrate_job_id
    }

    pub fn job_config(&self) -> &Arc<JobConfig> {
        &self.job
    }

    pub fn client(&self) -> Option<&Arc<ClientConfig>> {
        self.client.as_ref()
    }

    pub fn read_storage(&self) -> Option<&Arc<StorageConfig>> {
        self.read_storage.as_ref()
    }

    pub fn write_storage(&self) -> Option<&Arc<StorageConfig>> {
        self.write_storage.as_ref()
    }

    pub fn messages(&self) -> Option<&str> {
        self.messages.as_deref()
    }

    pub fn spool_data(&self) -> bool {
        self.spool_data
    }

    pub fn pools(&self) -> &PoolOverrides {
        &self.pools
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: JobStatus) {
        self.state.lock().status = status;
    }

    pub fn level(&self) -> JobLevel {
        self.state.lock().level
    }

    pub fn set_level(&self, level: JobLevel) {
        self.state.lock().level = level;
    }

    pub fn priority(&self) -> u32 {
        self.state.lock().priority
    }

    pub fn sched_time(&self) -> DateTime<Utc> {
        self.state.lock().sched_time
    }

    pub fn set_sched_time(&self, at: DateTime<Utc>) {
        self.state.lock().sched_time = at;
    }

    pub fn initial_sched_time(&self) -> DateTime<Utc> {
        self.state.lock().initial_sched_time
    }

    pub fn reschedule_count(&self) -> u32 {
        self.state.lock().reschedule_count
    }

    /// Bump the reschedule count, returning the new value.
    pub fn inc_reschedule_count(&self) -> u32 {
        let mut state = self.state.lock();
        state.reschedule_count += 1;
        state.reschedule_count
    }

    pub fn job_bytes(&self) -> u64 {
        self.state.lock().job_bytes
    }

    /// Set by the engine as data is written; drives the reschedule
    /// in-place-versus-clone decision.
    pub fn set_job_bytes(&self, bytes: u64) {
        self.state.lock().job_bytes = bytes;
    }

    pub fn job_errors(&self) -> u32 {
        self.state.lock().job_errors
    }

    pub fn add_job_errors(&self, count: u32) {
        self.state.lock().job_errors += count;
    }

    /// Reset the error counter before a reschedule re-run.
    pub fn clear_errors(&self) {
        self.state.lock().job_errors = 0;
    }

    pub fn acquired_permits(&self) -> bool {
        self.state.lock().acquired_permits
    }

    pub(crate) fn set_acquired_permits(&self, acquired: bool) {
        self.state.lock().acquired_permits = acquired;
    }

    /// Read and clear the permit flag in one step; the worker uses this to
    /// release permits exactly once.
    pub(crate) fn take_acquired_permits(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::take(&mut state.acquired_permits)
    }

    pub fn ignore_client_concurrency(&self) -> bool {
        self.state.lock().ignore_client_concurrency
    }

    pub(crate) fn set_ignore_client_concurrency(&self, ignore: bool) {
        self.state.lock().ignore_client_concurrency = ignore;
    }

    pub fn ignore_storage_concurrency(&self) -> bool {
        self.state.lock().ignore_storage_concurrency
    }

    pub(crate) fn set_ignore_storage_concurrency(&self, ignore: bool) {
        self.state.lock().ignore_storage_concurrency = ignore;
    }

    /// True once [`cancel`](Self::cancel) has been called. Lock-free; the
    /// waiter, the admission pass and the engine all poll this.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Request cooperative cancellation. The queue observes the flag at the
    /// waiter's nap boundaries and at admission; the engine must poll it.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        let mut state = self.state.lock();
        if !state.status.is_terminal() {
            state.status = JobStatus::Canceled;
        }
    }

    pub fn is_terminated_ok(&self) -> bool {
        self.status() == JobStatus::TerminatedOk
    }

    pub fn is_incomplete(&self) -> bool {
        self.status() == JobStatus::Incomplete
    }

    /// Wake anything blocked in [`wait_terminated`](Self::wait_terminated).
    /// Called by the worker at terminal disposal.
    pub(crate) fn notify_terminated(&self) {
        self.term.notify_one();
    }

    /// Wait until the worker disposes of this job. A job that is requeued by
    /// the reschedule engine does not count as terminated.
    pub async fn wait_terminated(&self) {
        self.term.notified().await;
    }

    /// Build the successor record for a reschedule that must preserve the
    /// original job id in the catalog. Copies the field set the reschedule
    /// engine is contracted to carry over; everything else starts fresh under
    /// a new id.
    pub(crate) fn clone_for_reschedule(&self) -> JobRecord {
        let state = self.state.lock();
        JobRecord {
            id: JobId::new(),
            name: self.name.clone(),
            job_type: self.job_type,
            migrate_job_id: self.migrate_job_id,
            job: Arc::clone(&self.job),
            client: self.client.clone(),
            read_storage: self.read_storage.clone(),
            write_storage: self.write_storage.clone(),
            messages: self.messages.clone(),
            spool_data: self.spool_data,
            pools: self.pools.clone(),
            canceled: AtomicBool::new(false),
            term: Notify::new(),
            state: Mutex::new(JobState {
                status: JobStatus::WaitStartTime,
                level: state.level,
                priority: state.priority,
                sched_time: state.sched_time,
                initial_sched_time: state.initial_sched_time,
                reschedule_count: state.reschedule_count,
                job_bytes: 0,
                job_errors: 0,
                acquired_permits: false,
                ignore_client_concurrency: false,
                ignore_storage_concurrency: false,
            }),
        }
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("job_type", &self.job_type)
            .field("status", &self.status())
            .field("priority", &self.priority())
            .finish()
    }
}
