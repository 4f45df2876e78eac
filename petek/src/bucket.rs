//! Bucket layout and the per-slot state machine.
//!
//! A bucket is an atomic triple: state byte, key pointer, value pointer.
//! The six states and their legal transitions:
//!
//! ```text
//! Empty ──CAS──▶ Inserting ──store──▶ Full         first insert
//! Deleted ──CAS──▶ Inserting ──store──▶ Full       reinsert over tombstone
//! Full ──CAS──▶ Updating ──store──▶ Full           value swap, same key
//! Full ──CAS──▶ Expunging ──store──▶ Deleted       delete
//! Updating ──store──▶ Full | Deleted               update aborts
//! Expunging ──store──▶ Deleted                     delete abort
//! ```
//!
//! `Inserting`, `Updating` and `Expunging` are intent states: the CAS winner
//! holds exclusive rights to the bucket until it stores a terminal state
//! with release ordering, which is what publishes the pointer writes to
//! readers that later observe the terminal state.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

/// Per-bucket lifecycle state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub(crate) enum SlotState {
    /// Never occupied; terminates probe sequences as an absence proof.
    Empty = 0,
    /// A writer won the insert CAS and is publishing key and value.
    Inserting = 1,
    /// Key and value published and readable.
    Full = 2,
    /// A writer won the update CAS and is swapping the value.
    Updating = 3,
    /// A writer won the delete CAS and is nulling the cells.
    Expunging = 4,
    /// Tombstone; key and value already retired.
    Deleted = 5,
}

impl SlotState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => SlotState::Empty,
            1 => SlotState::Inserting,
            2 => SlotState::Full,
            3 => SlotState::Updating,
            4 => SlotState::Expunging,
            5 => SlotState::Deleted,
            _ => unreachable!("corrupt slot state {raw}"),
        }
    }
}

/// One slot of the table. Callers pad with `CachePadded` at the array.
pub(crate) struct Bucket {
    state: AtomicU8,
    key: AtomicPtr<String>,
    value: AtomicPtr<String>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Empty as u8),
            key: AtomicPtr::new(ptr::null_mut()),
            value: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Intent CAS: acquire-release on success, relaxed on failure. Returns
    /// the observed state on failure so spin loops can re-dispatch on it.
    pub(crate) fn begin(&self, from: SlotState, intent: SlotState) -> Result<(), SlotState> {
        match self.state.compare_exchange(
            from as u8,
            intent as u8,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => Ok(()),
            Err(observed) => Err(SlotState::from_raw(observed)),
        }
    }

    /// Terminal store closing an intent state. Release-orders every pointer
    /// write made while the intent was held.
    pub(crate) fn finish(&self, terminal: SlotState) {
        self.state.store(terminal as u8, Ordering::Release);
    }

    pub(crate) fn key_cell(&self) -> &AtomicPtr<String> {
        &self.key
    }

    pub(crate) fn value_cell(&self) -> &AtomicPtr<String> {
        &self.value
    }

    pub(crate) fn key_ptr(&self) -> *mut String {
        self.key.load(Ordering::Acquire)
    }

    /// Publish into an empty cell. Relaxed is enough: the terminal `finish`
    /// is the release edge readers synchronize with.
    pub(crate) fn publish_key(&self, ptr: *mut String) {
        self.key.store(ptr, Ordering::Relaxed);
    }

    pub(crate) fn publish_value(&self, ptr: *mut String) {
        self.value.store(ptr, Ordering::Relaxed);
    }

    pub(crate) fn exchange_key(&self, ptr: *mut String) -> *mut String {
        self.key.swap(ptr, Ordering::AcqRel)
    }

    pub(crate) fn exchange_value(&self, ptr: *mut String) -> *mut String {
        self.value.swap(ptr, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_cas_admits_one_winner() {
        let bucket = Bucket::new();
        assert!(bucket.begin(SlotState::Empty, SlotState::Inserting).is_ok());
        assert_eq!(
            bucket.begin(SlotState::Empty, SlotState::Inserting),
            Err(SlotState::Inserting)
        );
    }

    #[test]
    fn insert_publishes_before_terminal() {
        let bucket = Bucket::new();
        bucket.begin(SlotState::Empty, SlotState::Inserting).unwrap();

        let key = Box::into_raw(Box::new(String::from("k")));
        let value = Box::into_raw(Box::new(String::from("v")));
        bucket.publish_key(key);
        bucket.publish_value(value);
        bucket.finish(SlotState::Full);

        assert_eq!(bucket.state(), SlotState::Full);
        assert_eq!(bucket.key_ptr(), key);

        unsafe {
            drop(Box::from_raw(bucket.exchange_key(std::ptr::null_mut())));
            drop(Box::from_raw(bucket.exchange_value(std::ptr::null_mut())));
        }
    }

    #[test]
    fn delete_leaves_tombstone_with_null_cells() {
        let bucket = Bucket::new();
        bucket.begin(SlotState::Empty, SlotState::Inserting).unwrap();
        let key = Box::into_raw(Box::new(String::from("k")));
        let value = Box::into_raw(Box::new(String::from("v")));
        bucket.publish_key(key);
        bucket.publish_value(value);
        bucket.finish(SlotState::Full);

        bucket.begin(SlotState::Full, SlotState::Expunging).unwrap();
        let old_key = bucket.exchange_key(std::ptr::null_mut());
        let old_value = bucket.exchange_value(std::ptr::null_mut());
        bucket.finish(SlotState::Deleted);

        assert_eq!(bucket.state(), SlotState::Deleted);
        assert!(bucket.key_ptr().is_null());
        unsafe {
            drop(Box::from_raw(old_key));
            drop(Box::from_raw(old_value));
        }
    }
}
