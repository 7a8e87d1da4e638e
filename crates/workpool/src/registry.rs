//! Master-owned registry of live workers.
//!
//! Entries are inserted on spawn and removed on reap, only by the master. The registry's
//! length is the number of spawned workers not yet reaped.

use std::fmt;
use std::time::Instant;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::WorkerKind;

/// Process id for OS workers, synthetic id for in-process workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl WorkerId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the master asks a worker to stop.
#[derive(Debug, Clone)]
pub enum WorkerHandle {
    #[cfg(unix)]
    Process(nix::unistd::Pid),
    Task(CancellationToken),
}

impl WorkerHandle {
    /// Best-effort terminate request; never waits for the worker.
    pub fn terminate(&self) -> Result<(), TerminateError> {
        match self {
            #[cfg(unix)]
            Self::Process(pid) => {
                nix::sys::signal::kill(*pid, nix::sys::signal::Signal::SIGTERM)
                    .map_err(|e| TerminateError(e.to_string()))
            }
            Self::Task(token) => {
                token.cancel();
                Ok(())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to signal worker: {0}")]
pub struct TerminateError(String);

#[derive(Debug)]
pub struct WorkerEntry {
    pub kind: WorkerKind,
    pub handle: WorkerHandle,
    pub spawned_at: Instant,
}

/// Live workers in spawn order.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: IndexMap<WorkerId, WorkerEntry>,
    peak: usize,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: WorkerId, kind: WorkerKind, handle: WorkerHandle) {
        self.workers.insert(
            id,
            WorkerEntry {
                kind,
                handle,
                spawned_at: Instant::now(),
            },
        );
        self.peak = self.peak.max(self.workers.len());
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<WorkerEntry> {
        self.workers.shift_remove(&id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains_key(&id)
    }

    /// Largest size the registry has reached.
    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn count_kind(&self, kind: WorkerKind) -> usize {
        self.workers.values().filter(|e| e.kind == kind).count()
    }

    pub fn ids(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.workers.keys().copied()
    }

    /// Send a terminate request to every registered worker. Failures are logged, not fatal.
    pub fn terminate_all(&self) -> usize {
        let mut signalled = 0;
        for (id, entry) in &self.workers {
            match entry.handle.terminate() {
                Ok(()) => signalled += 1,
                Err(e) => {
                    tracing::warn!(worker_id = %id, kind = %entry.kind, error = %e, "Terminate request failed");
                }
            }
        }
        signalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_handle() -> (WorkerHandle, CancellationToken) {
        let token = CancellationToken::new();
        (WorkerHandle::Task(token.clone()), token)
    }

    #[test]
    fn insert_remove_tracks_len_and_peak() {
        let mut registry = WorkerRegistry::new();
        assert!(registry.is_empty());

        for i in 1..=3 {
            let (handle, _) = task_handle();
            registry.insert(WorkerId(i), WorkerKind::Permanent, handle);
        }
        let (handle, _) = task_handle();
        registry.insert(WorkerId(4), WorkerKind::Elastic, handle);

        assert_eq!(registry.len(), 4);
        assert_eq!(registry.count_kind(WorkerKind::Elastic), 1);
        assert!(registry.contains(WorkerId(2)));

        assert!(registry.remove(WorkerId(2)).is_some());
        assert!(registry.remove(WorkerId(2)).is_none());
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.peak(), 4);
    }

    #[test]
    fn ids_in_spawn_order() {
        let mut registry = WorkerRegistry::new();
        for i in [5, 3, 9] {
            let (handle, _) = task_handle();
            registry.insert(WorkerId(i), WorkerKind::Permanent, handle);
        }
        registry.remove(WorkerId(3));
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec![WorkerId(5), WorkerId(9)]);
    }

    #[test]
    fn terminate_all_cancels_task_workers() {
        let mut registry = WorkerRegistry::new();
        let (h1, t1) = task_handle();
        let (h2, t2) = task_handle();
        registry.insert(WorkerId(1), WorkerKind::Permanent, h1);
        registry.insert(WorkerId(2), WorkerKind::Elastic, h2);

        assert_eq!(registry.terminate_all(), 2);
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
        // terminate does not reap
        assert_eq!(registry.len(), 2);
    }
}
