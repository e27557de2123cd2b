//! Configuration for the director job queue.
//!
//! Resource definitions (`JobConfig`, `ClientConfig`, `StorageConfig`) come
//! from the daemon's configuration parser; the queue only reads them. Timing
//! knobs on [`QueueConfig`] default to the production values and exist mainly
//! so the suite can exercise the slow paths quickly.

use serde::Deserialize;
use std::time::Duration;

/// Queue-wide configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of concurrent queue workers
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long an idle worker waits for new work before exiting (milliseconds)
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Nap taken when waiting jobs cannot acquire their resources
    /// (milliseconds). Worst-case admission latency after a permit release is
    /// one backoff period.
    #[serde(default = "default_starvation_backoff_ms")]
    pub starvation_backoff_ms: u64,

    /// Upper bound on a single scheduled-start nap (milliseconds); bounds the
    /// cancellation latency of a job waiting for its start time.
    #[serde(default = "default_sched_nap_ms")]
    pub sched_nap_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            idle_timeout_ms: default_idle_timeout_ms(),
            starvation_backoff_ms: default_starvation_backoff_ms(),
            sched_nap_ms: default_sched_nap_ms(),
        }
    }
}

impl QueueConfig {
    /// Create a config with the given worker bound and default timings.
    pub fn with_max_workers(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    /// Idle-worker timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Resource-starvation backoff as a [`Duration`].
    pub fn starvation_backoff(&self) -> Duration {
        Duration::from_millis(self.starvation_backoff_ms)
    }

    /// Scheduled-start nap cap as a [`Duration`].
    pub fn sched_nap(&self) -> Duration {
        Duration::from_millis(self.sched_nap_ms)
    }
}

fn default_max_workers() -> usize {
    10
}

fn default_idle_timeout_ms() -> u64 {
    4_000
}

fn default_starvation_backoff_ms() -> u64 {
    2_000
}

fn default_sched_nap_ms() -> u64 {
    30_000
}

/// A job definition resource.
///
/// Carries the per-definition concurrency cap and the reschedule policy the
/// queue consults after a job terminates.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Resource name
    pub name: String,

    /// Maximum jobs of this definition running at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Default priority for jobs of this definition; lower value runs first
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Allow this job to run alongside jobs of a different priority
    #[serde(default)]
    pub allow_mixed_priority: bool,

    /// Requeue the job when it terminates in error
    #[serde(default)]
    pub reschedule_on_error: bool,

    /// Requeue backups that stopped before completing
    #[serde(default)]
    pub reschedule_incomplete_jobs: bool,

    /// Reschedule attempt cap; 0 means unlimited
    #[serde(default = "default_reschedule_times")]
    pub reschedule_times: u32,

    /// Delay before a rescheduled job becomes due again (seconds)
    #[serde(default = "default_reschedule_interval_secs")]
    pub reschedule_interval_secs: u64,

    /// Spool job data before despooling to the final volume
    #[serde(default)]
    pub spool_data: bool,
}

impl JobConfig {
    /// Create a definition with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            priority: default_priority(),
            allow_mixed_priority: false,
            reschedule_on_error: false,
            reschedule_incomplete_jobs: false,
            reschedule_times: default_reschedule_times(),
            reschedule_interval_secs: default_reschedule_interval_secs(),
            spool_data: false,
        }
    }

    /// Set the concurrency cap.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Set the default priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Allow mixed-priority execution.
    pub fn with_mixed_priority(mut self) -> Self {
        self.allow_mixed_priority = true;
        self
    }

    /// Configure error rescheduling.
    pub fn with_reschedule_on_error(mut self, times: u32, interval_secs: u64) -> Self {
        self.reschedule_on_error = true;
        self.reschedule_times = times;
        self.reschedule_interval_secs = interval_secs;
        self
    }

    /// Configure incomplete-job rescheduling.
    pub fn with_reschedule_incomplete(mut self, times: u32, interval_secs: u64) -> Self {
        self.reschedule_incomplete_jobs = true;
        self.reschedule_times = times;
        self.reschedule_interval_secs = interval_secs;
        self
    }

    /// Reschedule delay as a [`chrono::Duration`].
    pub fn reschedule_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reschedule_interval_secs as i64)
    }
}

/// A client resource; only the concurrency cap matters to the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Resource name
    pub name: String,

    /// Maximum jobs touching this client at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl ClientConfig {
    pub fn new(name: impl Into<String>, max_concurrent_jobs: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent_jobs,
        }
    }
}

/// A storage daemon resource; only the concurrency cap matters to the queue.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Resource name
    pub name: String,

    /// Maximum jobs using this storage at once
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl StorageConfig {
    pub fn new(name: impl Into<String>, max_concurrent_jobs: usize) -> Self {
        Self {
            name: name.into(),
            max_concurrent_jobs,
        }
    }
}

/// Pool selection overrides carried on a job record and copied onto a
/// reschedule clone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PoolOverrides {
    pub pool: Option<String>,
    pub full_pool: Option<String>,
    pub incremental_pool: Option<String>,
    pub differential_pool: Option<String>,
    pub next_pool: Option<String>,
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_priority() -> u32 {
    10
}

fn default_reschedule_times() -> u32 {
    5
}

fn default_reschedule_interval_secs() -> u64 {
    1_800
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_workers, 10);
        assert_eq!(config.idle_timeout(), Duration::from_secs(4));
        assert_eq!(config.starvation_backoff(), Duration::from_secs(2));
        assert_eq!(config.sched_nap(), Duration::from_secs(30));
    }

    #[test]
    fn test_queue_config_deserialize_partial() {
        let config: QueueConfig = serde_json::from_str(r#"{"max_workers": 3}"#).unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.idle_timeout_ms, 4_000);
    }

    #[test]
    fn test_job_config_defaults() {
        let config: JobConfig = serde_json::from_str(r#"{"name": "nightly"}"#).unwrap();
        assert_eq!(config.name, "nightly");
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.priority, 10);
        assert!(!config.allow_mixed_priority);
        assert!(!config.reschedule_on_error);
        assert_eq!(config.reschedule_times, 5);
        assert_eq!(config.reschedule_interval_secs, 1_800);
    }

    #[test]
    fn test_job_config_builders() {
        let config = JobConfig::new("nightly")
            .with_priority(5)
            .with_mixed_priority()
            .with_reschedule_on_error(2, 60);
        assert_eq!(config.priority, 5);
        assert!(config.allow_mixed_priority);
        assert!(config.reschedule_on_error);
        assert_eq!(config.reschedule_times, 2);
        assert_eq!(config.reschedule_interval(), chrono::Duration::seconds(60));
    }
}
