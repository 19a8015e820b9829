// Session Registry
//
// Connection-scoped table of executors with work in flight. Used for bulk
// cancellation and running-query counts. Holds only weak references so a
// dropped executor never stays alive through the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::backend::JobReference;
use crate::common::types::ExecutorId;
use crate::query::executor::{CancelOutcome, ExecutorCore};

/// Registry of executors belonging to one connection
#[derive(Debug)]
pub struct SessionRegistry {
    /// Next executor ID to assign
    next_id: AtomicU64,

    /// Registered executors (executor id -> executor)
    entries: Mutex<HashMap<ExecutorId, Weak<ExecutorCore>>>,
}

/// Snapshot of one registry entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub executor_id: ExecutorId,
    pub job: Option<JobReference>,
    pub cancel_requested: bool,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        SessionRegistry::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve an executor id
    pub(crate) fn allocate_id(&self) -> ExecutorId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register an executor and return the guard that removes it again
    pub(crate) fn register(self: &Arc<Self>, executor: &Arc<ExecutorCore>) -> RegistryEntry {
        let id = executor.id();
        self.entries.lock().insert(id, Arc::downgrade(executor));
        debug!("[REGISTRY] Registered executor {}", id);
        RegistryEntry {
            inner: Arc::new(EntryGuard {
                id,
                registry: Arc::clone(self),
                released: AtomicBool::new(false),
            }),
        }
    }

    fn deregister(&self, id: ExecutorId) {
        if self.entries.lock().remove(&id).is_some() {
            debug!("[REGISTRY] Deregistered executor {}", id);
        } else {
            warn!("[REGISTRY] Executor {} was not registered", id);
        }
    }

    fn snapshot(&self) -> Vec<Arc<ExecutorCore>> {
        // Entries whose executor is gone are skipped here and dropped on release
        self.entries.lock().values().filter_map(Weak::upgrade).collect()
    }

    /// Number of registered executors
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Executors whose query has not reached a terminal state
    pub fn running_query_count(&self) -> usize {
        self.snapshot().iter().filter(|executor| executor.is_running()).count()
    }

    /// Cancel every running query; returns the number of cancellations issued
    pub fn cancel_all(&self) -> usize {
        let executors = self.snapshot();
        let mut cancelled = 0;
        for executor in executors.iter().filter(|executor| executor.is_running()) {
            match executor.request_cancel() {
                Ok(CancelOutcome::Delivered) | Ok(CancelOutcome::Latched) => cancelled += 1,
                Ok(CancelOutcome::NotNeeded) => {}
                Err(e) => warn!("[REGISTRY] Failed to cancel executor {}: {}", executor.id(), e),
            }
        }
        info!("[REGISTRY] Cancelled {} of {} registered executors", cancelled, executors.len());
        cancelled
    }

    /// Per-entry view for diagnostics
    pub fn entries(&self) -> Vec<EntryInfo> {
        let mut infos: Vec<EntryInfo> = self
            .snapshot()
            .iter()
            .map(|executor| EntryInfo {
                executor_id: executor.id(),
                job: executor.job_reference(),
                cancel_requested: executor.cancel_requested(),
            })
            .collect();
        infos.sort_by_key(|info| info.executor_id);
        infos
    }
}

#[derive(Debug)]
struct EntryGuard {
    id: ExecutorId,
    registry: Arc<SessionRegistry>,
    released: AtomicBool,
}

impl EntryGuard {
    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.registry.deregister(self.id);
        }
    }
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Registration of one executor, shared by the executor and its cursor.
///
/// Released on the first `release()` call or when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    inner: Arc<EntryGuard>,
}

impl RegistryEntry {
    pub fn executor_id(&self) -> ExecutorId {
        self.inner.id
    }

    /// Remove the executor from the registry; later calls do nothing
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }
}
