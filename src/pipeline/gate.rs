use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Single-slot execution gate guarding the canonical pipeline state.
///
/// The per-frame path uses [`ExecutionGate::try_acquire`], which never waits:
/// when another pass holds the slot the caller gets `None` and drops its frame.
/// Reconfiguration uses [`ExecutionGate::acquire_blocking`], which queues
/// behind the current holder. Waiters are served in FIFO order and a slot freed
/// while somebody is queued is handed to that waiter directly, so a pending
/// reconfiguration can never be starved by a stream of `try_acquire` calls.
///
/// Releasing happens when the [`GatePermit`] is dropped, which covers normal
/// completion, early returns, errors and task cancellation alike.
pub struct ExecutionGate<T> {
    slot: Arc<Mutex<T>>,
    counters: Arc<GateCounters>,
}

#[derive(Debug, Default)]
struct GateCounters {
    acquisitions: AtomicU64,
    releases: AtomicU64,
    rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateStats {
    pub acquisitions: u64,
    pub releases: u64,
    pub rejections: u64,
}

impl GateStats {
    pub fn in_flight(&self) -> u64 {
        self.acquisitions.saturating_sub(self.releases)
    }
}

impl<T> ExecutionGate<T> {
    pub fn new(state: T) -> Self {
        Self {
            slot: Arc::new(Mutex::new(state)),
            counters: Arc::new(GateCounters::default()),
        }
    }

    /// Take the slot if it is free right now. O(1), never suspends.
    pub fn try_acquire(&self) -> Option<GatePermit<T>> {
        match Arc::clone(&self.slot).try_lock_owned() {
            Ok(guard) => Some(self.permit(guard)),
            Err(_) => {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Wait until the slot is free, then take it.
    pub async fn acquire_blocking(&self) -> GatePermit<T> {
        let guard = Arc::clone(&self.slot).lock_owned().await;
        self.permit(guard)
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            acquisitions: self.counters.acquisitions.load(Ordering::Acquire),
            releases: self.counters.releases.load(Ordering::Acquire),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    fn permit(&self, guard: OwnedMutexGuard<T>) -> GatePermit<T> {
        self.counters.acquisitions.fetch_add(1, Ordering::AcqRel);
        GatePermit {
            guard,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T> Clone for ExecutionGate<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            counters: Arc::clone(&self.counters),
        }
    }
}

/// Proof of holding the execution slot. Dereferences to the guarded state.
pub struct GatePermit<T> {
    guard: OwnedMutexGuard<T>,
    counters: Arc<GateCounters>,
}

impl<T> GatePermit<T> {
    /// Release the slot. Equivalent to dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

impl<T> Deref for GatePermit<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for GatePermit<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for GatePermit<T> {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::AcqRel);
    }
}
