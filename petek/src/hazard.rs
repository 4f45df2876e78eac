//! Hazard records and the worker registry.
//!
//! Each registered worker owns one record in a fixed array: two pointer
//! cells (key hazard, value hazard) plus an `in_use` flag. Publishing a
//! pointer into a cell pins it against reclamation; `can_delete` is the
//! reclaimers' scan over all live records.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crossbeam_utils::CachePadded;

/// Cell index for the pointer currently read out of a bucket's key slot.
pub(crate) const KEY_HAZARD: usize = 0;
/// Cell index for the pointer currently read out of a bucket's value slot.
pub(crate) const VALUE_HAZARD: usize = 1;

/// One worker's hazard state: two protected-pointer cells and a claim flag.
pub(crate) struct HazardRecord {
    cells: [AtomicPtr<String>; 2],
    in_use: AtomicBool,
}

impl HazardRecord {
    fn new() -> Self {
        Self {
            cells: [AtomicPtr::new(ptr::null_mut()), AtomicPtr::new(ptr::null_mut())],
            in_use: AtomicBool::new(false),
        }
    }
}

/// Fixed array of hazard records, one per potential worker.
pub(crate) struct HazardArray {
    records: Box<[CachePadded<HazardRecord>]>,
}

impl HazardArray {
    pub(crate) fn new(max_workers: usize) -> Self {
        let mut records = Vec::with_capacity(max_workers);
        for _ in 0..max_workers {
            records.push(CachePadded::new(HazardRecord::new()));
        }
        Self {
            records: records.into_boxed_slice(),
        }
    }

    /// Claim the first free record. Returns its index, or `None` when every
    /// record is taken.
    pub(crate) fn claim(&self) -> Option<usize> {
        for (index, record) in self.records.iter().enumerate() {
            if record
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(index);
            }
        }
        None
    }

    /// Return a record to the pool. Both cells are cleared before the flag
    /// flips so no stale protection outlives the worker.
    pub(crate) fn release(&self, index: usize) {
        let record = &self.records[index];
        record.cells[KEY_HAZARD].store(ptr::null_mut(), Ordering::Relaxed);
        record.cells[VALUE_HAZARD].store(ptr::null_mut(), Ordering::Relaxed);
        record.in_use.store(false, Ordering::Release);
    }

    /// Read `cell` and pin the loaded pointer in this worker's hazard cell.
    ///
    /// The publish-then-reread loop guarantees that a non-null return was
    /// the cell's current value at some instant after the hazard became
    /// visible, so reclaimers scanning afterwards will observe it.
    pub(crate) fn protect(
        &self,
        index: usize,
        which: usize,
        cell: &AtomicPtr<String>,
    ) -> *mut String {
        let record = &self.records[index];
        loop {
            let observed = cell.load(Ordering::Acquire);
            if observed.is_null() {
                return ptr::null_mut();
            }
            record.cells[which].store(observed, Ordering::Release);
            if observed == cell.load(Ordering::Acquire) {
                return observed;
            }
        }
    }

    /// Drop protection from one cell. Relaxed: removing protection is a
    /// hint to reclaimers, never a correctness edge for this worker.
    pub(crate) fn clear(&self, index: usize, which: usize) {
        self.records[index].cells[which].store(ptr::null_mut(), Ordering::Relaxed);
    }

    pub(crate) fn clear_both(&self, index: usize) {
        self.clear(index, KEY_HAZARD);
        self.clear(index, VALUE_HAZARD);
    }

    /// True when no live record protects `ptr`.
    pub(crate) fn can_delete(&self, ptr: *const String) -> bool {
        for record in self.records.iter() {
            if !record.in_use.load(Ordering::Acquire) {
                continue;
            }
            if record.cells[KEY_HAZARD].load(Ordering::Acquire) as *const String == ptr {
                return false;
            }
            if record.cells[VALUE_HAZARD].load(Ordering::Acquire) as *const String == ptr {
                return false;
            }
        }
        true
    }
}
