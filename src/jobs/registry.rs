//! Concurrency registry.
//!
//! Counts jobs running against each named resource (client, job definition,
//! storage) so admission can enforce the per-resource `max_concurrent_jobs`
//! caps. The registry lock is deliberately separate from the queue lock: it is
//! only ever held for one counter test-and-increment or decrement, and is
//! never held while the queue lock is taken.
//!
//! An instance is passed into the queue at construction, so each test can run
//! against an isolated registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

/// Class of a counted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Client,
    Job,
    Storage,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Client => "client",
            Self::Job => "job",
            Self::Storage => "storage",
        };
        write!(f, "{name}")
    }
}

/// Identity of a counted resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceKey {
    pub fn client(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Client,
            name: name.into(),
        }
    }

    pub fn job(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Job,
            name: name.into(),
        }
    }

    pub fn storage(name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Storage,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

#[derive(Debug, Default)]
struct ResourceUsage {
    active: i64,
    active_readers: i64,
}

/// Counter table for all concurrency-limited resources.
#[derive(Debug, Default)]
pub struct ConcurrencyRegistry {
    usage: Mutex<HashMap<ResourceKey, ResourceUsage>>,
}

impl ConcurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one unit of capacity on the resource if `active < max`.
    pub fn try_acquire(&self, key: &ResourceKey, max: usize) -> bool {
        let mut usage = self.usage.lock();
        let entry = usage.entry(key.clone()).or_default();
        if entry.active < max as i64 {
            entry.active += 1;
            tracing::debug!(resource = %key, active = entry.active, "acquired concurrency permit");
            true
        } else {
            tracing::debug!(resource = %key, active = entry.active, max, "concurrency permit exhausted");
            false
        }
    }

    /// Return one unit of capacity.
    pub fn release(&self, key: &ResourceKey) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(key.clone()).or_default();
        entry.active -= 1;
        tracing::debug!(resource = %key, active = entry.active, "released concurrency permit");
        if entry.active < 0 {
            // Counter bookkeeping is diagnostic only; keep running so the
            // real fault stays observable.
            tracing::error!(
                resource = %key,
                active = entry.active,
                "fatal: concurrency counter went negative"
            );
        }
    }

    /// Take read capacity on a storage resource. Tracks the reader sub-count
    /// alongside the shared active count.
    pub fn try_acquire_read(&self, key: &ResourceKey, max: usize) -> bool {
        let mut usage = self.usage.lock();
        let entry = usage.entry(key.clone()).or_default();
        if entry.active < max as i64 {
            entry.active += 1;
            entry.active_readers += 1;
            tracing::debug!(
                resource = %key,
                active = entry.active,
                readers = entry.active_readers,
                "acquired read-storage permit"
            );
            true
        } else {
            tracing::debug!(resource = %key, active = entry.active, max, "read-storage permit exhausted");
            false
        }
    }

    /// Return read capacity on a storage resource.
    pub fn release_read(&self, key: &ResourceKey) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(key.clone()).or_default();
        entry.active -= 1;
        entry.active_readers -= 1;
        if entry.active < 0 || entry.active_readers < 0 {
            tracing::error!(
                resource = %key,
                active = entry.active,
                readers = entry.active_readers,
                "fatal: read-storage counter went negative"
            );
        }
    }

    /// Current active count for a resource. Zero for resources never seen.
    pub fn active(&self, key: &ResourceKey) -> i64 {
        self.usage.lock().get(key).map_or(0, |u| u.active)
    }

    /// Current reader sub-count for a storage resource.
    pub fn active_readers(&self, key: &ResourceKey) -> i64 {
        self.usage.lock().get(key).map_or(0, |u| u.active_readers)
    }
}
