//! Admission control.
//!
//! Decides which waiting jobs may move to the ready queue. Two gates:
//! the priority cohort (only jobs matching the running set's priority are
//! considered, with a mixed-priority escape hatch) and permit acquisition
//! against the concurrency registry.
//!
//! Permits are taken in a fixed order: read storage, write storage, client,
//! job definition. The fixed order plus the registry's no-nesting rule is
//! what keeps the two-lock scheme deadlock free. Acquisition is
//! all-or-nothing: any failure backs out the permits already taken in this
//! attempt, in reverse order, and records the wait status of the failing
//! permit class on the job.

use std::sync::Arc;

use super::record::{JobRecord, JobStatus};
use super::registry::{ConcurrencyRegistry, ResourceKey};

/// The priority cohort admissible in the current promotion pass.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cohort {
    /// Priority value jobs must match to be considered.
    pub priority: u32,
    /// True when every running job tolerates mixed priorities.
    pub mixing_allowed: bool,
}

/// Pick the cohort for a promotion pass: the running head's priority if
/// anything is running, otherwise the waiting head's.
pub(crate) fn select_cohort(running: &[Arc<JobRecord>], waiting_head: &JobRecord) -> Cohort {
    match running.first() {
        Some(head) => Cohort {
            priority: head.priority(),
            mixing_allowed: running
                .iter()
                .all(|job| job.job_config().allow_mixed_priority),
        },
        None => Cohort {
            priority: waiting_head.priority(),
            mixing_allowed: false,
        },
    }
}

/// A candidate fits the cohort if it has the cohort priority, or a more
/// urgent one and both it and every running job allow priority mixing.
/// The waiting queue is priority sorted, so the promotion scan stops at the
/// first candidate this rejects.
pub(crate) fn within_cohort(job: &JobRecord, cohort: &Cohort) -> bool {
    job.priority() == cohort.priority
        || (job.priority() < cohort.priority
            && job.job_config().allow_mixed_priority
            && cohort.mixing_allowed)
}

/// Try to take every permit the job needs. On success the job's
/// `acquired_permits` flag is set; on failure nothing is held and the job's
/// status records which permit class was exhausted.
pub(crate) fn acquire_permits(job: &JobRecord, registry: &ConcurrencyRegistry) -> bool {
    job.set_acquired_permits(false);
    apply_job_type_exceptions(job);

    if !acquire_read_storage(job, registry) {
        job.set_status(JobStatus::WaitStoreRes);
        return false;
    }

    if !acquire_write_storage(job, registry) {
        release_read_storage(job, registry);
        job.set_status(JobStatus::WaitStoreRes);
        return false;
    }

    if !acquire_client(job, registry) {
        release_write_storage(job, registry);
        release_read_storage(job, registry);
        job.set_status(JobStatus::WaitClientRes);
        return false;
    }

    if !acquire_job_definition(job, registry) {
        release_client(job, registry);
        release_write_storage(job, registry);
        release_read_storage(job, registry);
        job.set_status(JobStatus::WaitJobRes);
        return false;
    }

    job.set_acquired_permits(true);
    true
}

/// Release every permit class, reverse of the acquisition order. Only called
/// for jobs whose `acquired_permits` flag was set.
pub(crate) fn release_permits(job: &JobRecord, registry: &ConcurrencyRegistry) {
    release_job_definition(job, registry);
    release_client(job, registry);
    release_write_storage(job, registry);
    release_read_storage(job, registry);
}

/// Migration, copy and consolidation jobs never touch the client; their
/// control variants (no source job id yet) touch no storage either.
fn apply_job_type_exceptions(job: &JobRecord) {
    if job.job_type().skips_client_concurrency() {
        job.set_ignore_client_concurrency(true);
        tracing::debug!(job = %job.name(), "exempt from client concurrency");

        if job.migrate_job_id().is_none() {
            job.set_ignore_storage_concurrency(true);
            tracing::debug!(job = %job.name(), "control job, exempt from storage concurrency");
        }
    }
}

fn acquire_read_storage(job: &JobRecord, registry: &ConcurrencyRegistry) -> bool {
    match job.read_storage() {
        Some(storage) if !job.ignore_storage_concurrency() => registry.try_acquire_read(
            &ResourceKey::storage(&storage.name),
            storage.max_concurrent_jobs,
        ),
        _ => true,
    }
}

fn release_read_storage(job: &JobRecord, registry: &ConcurrencyRegistry) {
    if let Some(storage) = job.read_storage() {
        if !job.ignore_storage_concurrency() {
            registry.release_read(&ResourceKey::storage(&storage.name));
        }
    }
}

fn acquire_write_storage(job: &JobRecord, registry: &ConcurrencyRegistry) -> bool {
    match job.write_storage() {
        Some(storage) if !job.ignore_storage_concurrency() => registry.try_acquire(
            &ResourceKey::storage(&storage.name),
            storage.max_concurrent_jobs,
        ),
        _ => true,
    }
}

fn release_write_storage(job: &JobRecord, registry: &ConcurrencyRegistry) {
    if let Some(storage) = job.write_storage() {
        if !job.ignore_storage_concurrency() {
            registry.release(&ResourceKey::storage(&storage.name));
        }
    }
}

fn acquire_client(job: &JobRecord, registry: &ConcurrencyRegistry) -> bool {
    match job.client() {
        Some(client) if !job.ignore_client_concurrency() => registry.try_acquire(
            &ResourceKey::client(&client.name),
            client.max_concurrent_jobs,
        ),
        _ => true,
    }
}

fn release_client(job: &JobRecord, registry: &ConcurrencyRegistry) {
    if job.ignore_client_concurrency() {
        return;
    }
    if let Some(client) = job.client() {
        registry.release(&ResourceKey::client(&client.name));
    }
}

fn acquire_job_definition(job: &JobRecord, registry: &ConcurrencyRegistry) -> bool {
    let config = job.job_config();
    registry.try_acquire(&ResourceKey::job(&config.name), config.max_concurrent_jobs)
}

fn release_job_definition(job: &JobRecord, registry: &ConcurrencyRegistry) {
    registry.release(&ResourceKey::job(&job.job_config().name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, JobConfig, StorageConfig};
    use crate::jobs::record::JobType;

    fn backup(name: &str, config: JobConfig) -> JobRecord {
        JobRecord::new(name, JobType::Backup, Arc::new(config))
    }

    #[test]
    fn test_acquire_all_permit_classes() {
        let registry = ConcurrencyRegistry::new();
        let job = backup("full.1", JobConfig::new("full").with_max_concurrent_jobs(2))
            .with_client(Arc::new(ClientConfig::new("filer", 2)))
            .with_read_storage(Arc::new(StorageConfig::new("disk", 2)))
            .with_write_storage(Arc::new(StorageConfig::new("tape", 2)));

        assert!(acquire_permits(&job, &registry));
        assert!(job.acquired_permits());
        assert_eq!(registry.active(&ResourceKey::storage("disk")), 1);
        assert_eq!(registry.active_readers(&ResourceKey::storage("disk")), 1);
        assert_eq!(registry.active(&ResourceKey::storage("tape")), 1);
        assert_eq!(registry.active(&ResourceKey::client("filer")), 1);
        assert_eq!(registry.active(&ResourceKey::job("full")), 1);

        release_permits(&job, &registry);
        assert_eq!(registry.active(&ResourceKey::storage("disk")), 0);
        assert_eq!(registry.active(&ResourceKey::storage("tape")), 0);
        assert_eq!(registry.active(&ResourceKey::client("filer")), 0);
        assert_eq!(registry.active(&ResourceKey::job("full")), 0);
    }

    #[test]
    fn test_write_storage_failure_backs_out_read() {
        let registry = ConcurrencyRegistry::new();
        let tape = Arc::new(StorageConfig::new("tape", 0));
        let disk = Arc::new(StorageConfig::new("disk", 4));
        let job = backup("full.1", JobConfig::new("full"))
            .with_read_storage(Arc::clone(&disk))
            .with_write_storage(tape);

        assert!(!acquire_permits(&job, &registry));
        assert_eq!(job.status(), JobStatus::WaitStoreRes);
        assert!(!job.acquired_permits());
        assert_eq!(registry.active(&ResourceKey::storage("disk")), 0);
        assert_eq!(registry.active_readers(&ResourceKey::storage("disk")), 0);
    }

    #[test]
    fn test_client_failure_backs_out_storage() {
        let registry = ConcurrencyRegistry::new();
        let busy = ResourceKey::client("filer");
        assert!(registry.try_acquire(&busy, 1));

        let job = backup("full.1", JobConfig::new("full"))
            .with_client(Arc::new(ClientConfig::new("filer", 1)))
            .with_write_storage(Arc::new(StorageConfig::new("tape", 4)));

        assert!(!acquire_permits(&job, &registry));
        assert_eq!(job.status(), JobStatus::WaitClientRes);
        assert_eq!(registry.active(&ResourceKey::storage("tape")), 0);
        assert_eq!(registry.active(&busy), 1);
    }

    #[test]
    fn test_job_definition_failure_backs_out_everything() {
        let registry = ConcurrencyRegistry::new();
        let config = JobConfig::new("full").with_max_concurrent_jobs(1);
        assert!(registry.try_acquire(&ResourceKey::job("full"), 1));

        let job = backup("full.1", config)
            .with_client(Arc::new(ClientConfig::new("filer", 4)))
            .with_write_storage(Arc::new(StorageConfig::new("tape", 4)));

        assert!(!acquire_permits(&job, &registry));
        assert_eq!(job.status(), JobStatus::WaitJobRes);
        assert_eq!(registry.active(&ResourceKey::client("filer")), 0);
        assert_eq!(registry.active(&ResourceKey::storage("tape")), 0);
        assert_eq!(registry.active(&ResourceKey::job("full")), 1);
    }

    #[test]
    fn test_migrate_data_job_skips_client_only() {
        let registry = ConcurrencyRegistry::new();
        let job = JobRecord::new("move.1", JobType::Migrate, Arc::new(JobConfig::new("move")))
            .with_migrate_job(crate::jobs::record::JobId::new())
            .with_client(Arc::new(ClientConfig::new("filer", 0)))
            .with_write_storage(Arc::new(StorageConfig::new("tape", 1)));

        // Client cap of zero would reject, but migrate jobs bypass it.
        assert!(acquire_permits(&job, &registry));
        assert_eq!(registry.active(&ResourceKey::client("filer")), 0);
        assert_eq!(registry.active(&ResourceKey::storage("tape")), 1);
    }

    #[test]
    fn test_migrate_control_job_skips_storage_too() {
        let registry = ConcurrencyRegistry::new();
        let job = JobRecord::new("move.0", JobType::Copy, Arc::new(JobConfig::new("move")))
            .with_write_storage(Arc::new(StorageConfig::new("tape", 0)));

        assert!(acquire_permits(&job, &registry));
        assert_eq!(registry.active(&ResourceKey::storage("tape")), 0);
        assert!(job.ignore_storage_concurrency());
        assert!(job.ignore_client_concurrency());
    }

    #[test]
    fn test_cohort_from_running_head() {
        let mixing = JobConfig::new("mix").with_mixed_priority();
        let strict = JobConfig::new("strict");

        let running = vec![
            Arc::new(backup("a", mixing.clone().with_priority(10))),
            Arc::new(backup("b", mixing.with_priority(10))),
        ];
        let head = backup("w", strict.clone().with_priority(5));

        let cohort = select_cohort(&running, &head);
        assert_eq!(cohort.priority, 10);
        assert!(cohort.mixing_allowed);

        let running = vec![
            Arc::clone(&running[0]),
            Arc::new(backup("c", strict.with_priority(10))),
        ];
        let cohort = select_cohort(&running, &head);
        assert!(!cohort.mixing_allowed);
    }

    #[test]
    fn test_cohort_from_waiting_head_when_idle() {
        let head = backup("w", JobConfig::new("full").with_priority(7));
        let cohort = select_cohort(&[], &head);
        assert_eq!(cohort.priority, 7);
        assert!(!cohort.mixing_allowed);
    }

    #[test]
    fn test_within_cohort_rules() {
        let cohort = Cohort {
            priority: 10,
            mixing_allowed: true,
        };

        let same = backup("a", JobConfig::new("full").with_priority(10));
        assert!(within_cohort(&same, &cohort));

        let urgent_mixing = backup(
            "b",
            JobConfig::new("full").with_priority(5).with_mixed_priority(),
        );
        assert!(within_cohort(&urgent_mixing, &cohort));

        // An urgent job that does not itself allow mixing stays back.
        let urgent_strict = backup("c", JobConfig::new("full").with_priority(5));
        assert!(!within_cohort(&urgent_strict, &cohort));

        // Lower-urgency jobs never jump the cohort.
        let later = backup(
            "d",
            JobConfig::new("full").with_priority(20).with_mixed_priority(),
        );
        assert!(!within_cohort(&later, &cohort));

        // With a strict runner in the set, urgency never mixes in.
        let strict_cohort = Cohort {
            priority: 10,
            mixing_allowed: false,
        };
        assert!(!within_cohort(&urgent_mixing, &strict_cohort));
    }
}
