//! # Director Core
//!
//! Job queue and admission scheduler for the backup director daemon.
//!
//! ## Architecture
//!
//! - **Job Queue**: three lists (waiting / ready / running) under one lock,
//!   priority-ordered admission with a mixed-priority escape hatch
//! - **Scheduled-Start Waiter**: cancellable bounded-nap sleep until a job's
//!   start time
//! - **Worker Pool**: elastic tokio tasks, spawned on demand and exiting
//!   after an idle timeout
//! - **Admission Control**: all-or-nothing acquisition of up to four
//!   concurrency permits per job (client, job definition, read and write
//!   storage)
//! - **Concurrency Registry**: counter table enforcing per-resource
//!   `max_concurrent_jobs` caps
//! - **Reschedule Engine**: requeues failed or incomplete backups, in place
//!   or as a cloned successor job
//!
//! The execution routine itself, the catalog, and job definition loading are
//! external collaborators behind the [`jobs::JobEngine`] and
//! [`jobs::DirectorHooks`] traits. The queue keeps no persistent state; on
//! restart, jobs are re-submitted by the surrounding daemon.

pub mod config;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use error::{DirectorError, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::config::{ClientConfig, JobConfig, PoolOverrides, QueueConfig, StorageConfig};
    pub use crate::error::{DirectorError, Result};
    pub use crate::jobs::{
        ConcurrencyRegistry, DirectorHooks, JobEngine, JobId, JobLevel, JobQueue, JobRecord,
        JobStatus, JobType, QueueSnapshot, QueueStats, ResourceKey, ResourceKind,
    };
}
