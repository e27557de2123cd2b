//! Job queue and admission scheduling.
//!
//! The director's scheduling core: jobs enter through [`JobQueue::submit`],
//! wait for their start time and their concurrency permits, run on an elastic
//! worker pool, and may be requeued by the reschedule engine when they fail.
//!
//! ```text
//!  submit ──▶ scheduled-start waiter ──▶ waiting (priority sorted)
//!                                            │ admission (cohort + permits)
//!                                            ▼
//!                                          ready ──▶ worker ──▶ engine
//!                                                                 │
//!                                   reschedule engine ◀───────────┘
//!                                     │ requeue / clone
//!                                     ▼
//!                                  submit / run_job
//! ```

pub mod engine;
pub mod queue;
pub mod record;
pub mod registry;

mod admission;
mod reschedule;

pub use engine::{DirectorHooks, JobEngine};
pub use queue::{JobQueue, QueueSnapshot, QueueStats};
pub use record::{JobId, JobLevel, JobRecord, JobStatus, JobType};
pub use registry::{ConcurrencyRegistry, ResourceKey, ResourceKind};
