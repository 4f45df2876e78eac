//! Deferred reclamation: per-worker retired lists and the shared orphan
//! list that departing workers hand their unreclaimable leftovers to.

use parking_lot::Mutex;

use crate::hazard::HazardArray;

/// A string pointer displaced from the table and awaiting deletion.
///
/// The wrapper exists so retired pointers can ride in containers that cross
/// thread boundaries at worker teardown.
pub(crate) struct Retired(pub(crate) *mut String);

// SAFETY: a retired pointer is exclusively owned by whichever list holds it.
// It was exchanged out of its bucket cell, so no new reader can reach it,
// and it is freed at most once, after `can_delete` clears it.
unsafe impl Send for Retired {}

/// Ordered list of retired pointers owned by a single worker.
pub(crate) struct RetiredList {
    ptrs: Vec<Retired>,
}

impl RetiredList {
    pub(crate) fn new() -> Self {
        Self { ptrs: Vec::new() }
    }

    pub(crate) fn push(&mut self, ptr: *mut String) {
        if ptr.is_null() {
            return;
        }
        self.ptrs.push(Retired(ptr));
    }

    pub(crate) fn len(&self) -> usize {
        self.ptrs.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ptrs.is_empty()
    }

    /// Free every entry no hazard cell still references, keep the rest.
    pub(crate) fn scan(&mut self, hazards: &HazardArray) {
        self.ptrs.retain(|retired| {
            if hazards.can_delete(retired.0) {
                // SAFETY: the pointer was exchanged out of its bucket, is
                // held only by this list, and the scan just proved no live
                // hazard cell names it.
                unsafe { drop(Box::from_raw(retired.0)) };
                false
            } else {
                true
            }
        });
    }

    pub(crate) fn take_all(&mut self) -> Vec<Retired> {
        std::mem::take(&mut self.ptrs)
    }
}

/// Retired pointers whose owning worker departed before they became
/// deletable. Swept opportunistically by surviving workers and drained
/// unconditionally when the table is dropped.
pub(crate) struct OrphanList {
    inner: Mutex<Vec<Retired>>,
}

impl OrphanList {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn adopt(&self, mut leftovers: Vec<Retired>) {
        if leftovers.is_empty() {
            return;
        }
        self.inner.lock().append(&mut leftovers);
    }

    /// Best-effort sweep. Skips entirely if another worker holds the lock;
    /// orphans are a cold path and nothing depends on this succeeding now.
    pub(crate) fn try_sweep(&self, hazards: &HazardArray) {
        let Some(mut orphans) = self.inner.try_lock() else {
            return;
        };
        orphans.retain(|retired| {
            if hazards.can_delete(retired.0) {
                // SAFETY: same ownership argument as `RetiredList::scan`;
                // the lock makes this list single-owner for the duration.
                unsafe { drop(Box::from_raw(retired.0)) };
                false
            } else {
                true
            }
        });
    }

    /// Free everything. Only sound with exclusive access to the table,
    /// which `Table::drop` has by definition.
    pub(crate) fn drain_all(&self) {
        let mut orphans = self.inner.lock();
        for retired in orphans.drain(..) {
            // SAFETY: exclusive table access; no worker or reader remains.
            unsafe { drop(Box::from_raw(retired.0)) };
        }
    }
}
