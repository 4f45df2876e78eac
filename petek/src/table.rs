//! The table itself: configuration, worker registration, and the
//! `get`/`set`/`del` operations over the slot state machine.

use std::ptr;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::CachePadded;

use crate::backoff::{CooldownSchedule, SpinTracker};
use crate::bucket::{Bucket, SlotState};
use crate::error::Error;
use crate::hazard::{HazardArray, KEY_HAZARD, VALUE_HAZARD};
use crate::metrics::{MetricsSink, NoopSink, Transition};
use crate::probe::ProbeSeq;
use crate::retired::{OrphanList, RetiredList};

/// Start-time tunables. Fixed for the table's lifetime.
#[derive(Clone, Debug)]
pub struct TableConfig {
    /// Bucket count. Also the probe sequence length.
    pub capacity: usize,
    /// Hazard array size: the maximum number of concurrently registered
    /// workers.
    pub max_workers: usize,
    /// Retired-list length that triggers a reclamation scan.
    pub retire_batch: usize,
    /// Contested-state observations between cooldown sleeps in `set`.
    pub spin_per_sleep: u32,
    /// Sleep ladder for those cooldowns.
    pub cooldown: CooldownSchedule,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_workers: 250,
            retire_batch: 100,
            spin_per_sleep: 10_000,
            cooldown: CooldownSchedule::default(),
        }
    }
}

/// Fixed-capacity concurrent string table.
///
/// The bucket array, the hazard array and the orphan list live here; there
/// are no process globals. Workers borrow the table, so it cannot be
/// dropped while any worker is live.
pub struct Table {
    buckets: Box<[CachePadded<Bucket>]>,
    hazards: HazardArray,
    orphans: OrphanList,
    sink: Arc<dyn MetricsSink>,
    config: TableConfig,
}

impl Table {
    /// Table with default tunables and no metrics collection.
    pub fn new() -> Self {
        Self::with_config(TableConfig::default())
    }

    /// Table with explicit tunables.
    pub fn with_config(config: TableConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopSink))
    }

    /// Table with explicit tunables and a metrics sink.
    pub fn with_metrics(config: TableConfig, sink: Arc<dyn MetricsSink>) -> Self {
        assert!(config.capacity > 0, "capacity must be nonzero");
        assert!(config.max_workers > 0, "max_workers must be nonzero");
        assert!(config.retire_batch > 0, "retire_batch must be nonzero");
        assert!(config.spin_per_sleep > 0, "spin_per_sleep must be nonzero");

        let mut buckets = Vec::with_capacity(config.capacity);
        for _ in 0..config.capacity {
            buckets.push(CachePadded::new(Bucket::new()));
        }
        Self {
            buckets: buckets.into_boxed_slice(),
            hazards: HazardArray::new(config.max_workers),
            orphans: OrphanList::new(),
            sink,
            config,
        }
    }

    /// Bucket count.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Maximum number of concurrently registered workers.
    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    /// Claim a hazard record and return the worker handle that brackets
    /// this thread's use of the table.
    pub fn register(&self) -> Result<Worker<'_>, Error> {
        let index = self.hazards.claim().ok_or(Error::NoHazardSlot)?;
        Ok(Worker {
            table: self,
            index,
            retired: RetiredList::new(),
        })
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        // Exclusive access: every worker borrow has ended. Free whatever
        // the buckets still hold (including stale cells behind tombstones
        // left by delete aborts), then the orphans.
        for bucket in self.buckets.iter() {
            let key = bucket.exchange_key(ptr::null_mut());
            if !key.is_null() {
                // SAFETY: exchanged out under exclusive access; the cell
                // was this pointer's sole owner.
                unsafe { drop(Box::from_raw(key)) };
            }
            let value = bucket.exchange_value(ptr::null_mut());
            if !value.is_null() {
                // SAFETY: as above.
                unsafe { drop(Box::from_raw(value)) };
            }
        }
        self.orphans.drain_all();
    }
}

/// What a bucket-local update attempt decided.
enum UpdateOutcome {
    /// The value was swapped in; the operation is complete.
    Done,
    /// The key vanished or was replaced beneath us; continue probing.
    Reprobe,
}

/// A registered worker: a stable hazard index plus the thread's retired
/// list. Dropping the worker releases the index unconditionally, so no
/// exit path can leak a hazard record.
pub struct Worker<'t> {
    table: &'t Table,
    index: usize,
    retired: RetiredList,
}

impl Worker<'_> {
    /// Look up `key` and return an owned snapshot of its value.
    ///
    /// The clone happens while both hazard cells pin the pointers, so the
    /// returned string is decoupled from reclamation.
    pub fn get(&self, key: &str) -> Option<String> {
        let table = self.table;
        let hazards = &table.hazards;

        for index in ProbeSeq::new(key, table.config.capacity) {
            let bucket = &table.buckets[index];
            match bucket.state() {
                SlotState::Empty => return None,
                SlotState::Full => {}
                _ => continue,
            }

            let protected = hazards.protect(self.index, KEY_HAZARD, bucket.key_cell());
            if protected.is_null() {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }
            // SAFETY: `protect` re-verified the cell after publishing our
            // hazard, so the string cannot have been freed, and published
            // strings are never mutated.
            if unsafe { (*protected).as_str() } != key {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }

            let value = hazards.protect(self.index, VALUE_HAZARD, bucket.value_cell());
            if value.is_null() {
                // Deleted between our key-protect and value-protect;
                // treat as a tombstone and probe on.
                hazards.clear_both(self.index);
                continue;
            }
            if !ptr::eq(protected, bucket.key_ptr()) {
                // Key displaced between steps; the value we protected may
                // belong to someone else.
                hazards.clear_both(self.index);
                continue;
            }

            // SAFETY: pinned by our value hazard; see key SAFETY above.
            let snapshot = unsafe { (*value).clone() };
            hazards.clear_both(self.index);
            return Some(snapshot);
        }
        None
    }

    /// Insert or update `key` to `value`.
    ///
    /// Fails with [`Error::TableFull`] when a full probe pass finds no
    /// empty bucket, no tombstone and no matching key.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let table = self.table;
        let hazards = &table.hazards;

        for index in ProbeSeq::new(key, table.config.capacity) {
            let bucket = &table.buckets[index];
            match bucket.state() {
                SlotState::Empty => {
                    if bucket.begin(SlotState::Empty, SlotState::Inserting).is_ok() {
                        let started = Instant::now();
                        bucket.publish_key(heap(key));
                        bucket.publish_value(heap(value));
                        bucket.finish(SlotState::Full);
                        table
                            .sink
                            .on_transition(Transition::InsertEmpty, started.elapsed());
                        return Ok(());
                    }
                    continue;
                }
                SlotState::Deleted => {
                    if bucket.begin(SlotState::Deleted, SlotState::Inserting).is_ok() {
                        let started = Instant::now();
                        let old_key = bucket.exchange_key(heap(key));
                        let old_value = bucket.exchange_value(heap(value));
                        bucket.finish(SlotState::Full);
                        self.retire(old_key);
                        self.retire(old_value);
                        table
                            .sink
                            .on_transition(Transition::InsertTombstone, started.elapsed());
                        return Ok(());
                    }
                    continue;
                }
                SlotState::Full => {}
                _ => continue,
            }

            let protected = hazards.protect(self.index, KEY_HAZARD, bucket.key_cell());
            if protected.is_null() {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }
            // SAFETY: pinned by our key hazard; published strings are
            // immutable.
            if unsafe { (*protected).as_str() } != key {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }
            if !ptr::eq(protected, bucket.key_ptr()) {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }

            match self.update_in_place(bucket, protected, value) {
                UpdateOutcome::Done => return Ok(()),
                UpdateOutcome::Reprobe => continue,
            }
        }
        Err(Error::TableFull)
    }

    /// The `Full → Updating → Full` path, with the spin loop for a bucket
    /// another writer currently holds in an intent state.
    ///
    /// `expected_key` is hazard-protected by the caller; this function
    /// clears that hazard on every exit path.
    fn update_in_place(
        &mut self,
        bucket: &Bucket,
        expected_key: *mut String,
        value: &str,
    ) -> UpdateOutcome {
        let table = self.table;
        let hazards = &table.hazards;
        let mut tracker = SpinTracker::new(&table.config.cooldown, table.config.spin_per_sleep);
        let mut observed = bucket.state();

        loop {
            if observed != SlotState::Full {
                tracker.note();
                if observed == SlotState::Deleted {
                    // The key was deleted while we waited; this bucket is
                    // done hosting it.
                    if let Some(episode) = tracker.episode(false) {
                        table.sink.on_spin_episode(episode);
                    }
                    hazards.clear(self.index, KEY_HAZARD);
                    return UpdateOutcome::Reprobe;
                }
                tracker.cooldown_if_due();
                observed = bucket.state();
                continue;
            }

            // Bucket settled back to Full; did our key survive the owner
            // we waited out?
            if !ptr::eq(expected_key, bucket.key_ptr()) {
                if let Some(episode) = tracker.episode(false) {
                    table.sink.on_spin_episode(episode);
                }
                hazards.clear(self.index, KEY_HAZARD);
                return UpdateOutcome::Reprobe;
            }

            match bucket.begin(SlotState::Full, SlotState::Updating) {
                Err(now) => {
                    observed = now;
                    continue;
                }
                Ok(()) => {}
            }

            let started = Instant::now();

            // We hold the intent, but the key may have changed between our
            // last check and the CAS win. The terminal state depends on
            // what happened: a deleted key leaves nulled cells that must
            // read as a tombstone, a swapped key is someone else's live
            // data that must stay Full.
            let current = bucket.key_ptr();
            if !ptr::eq(expected_key, current) {
                if current.is_null() {
                    bucket.finish(SlotState::Deleted);
                    table
                        .sink
                        .on_transition(Transition::UpdateAbortDeleted, started.elapsed());
                } else {
                    bucket.finish(SlotState::Full);
                    table
                        .sink
                        .on_transition(Transition::UpdateAbortSwapped, started.elapsed());
                }
                if let Some(episode) = tracker.episode(false) {
                    table.sink.on_spin_episode(episode);
                }
                hazards.clear(self.index, KEY_HAZARD);
                return UpdateOutcome::Reprobe;
            }

            let old_value = bucket.exchange_value(heap(value));
            bucket.finish(SlotState::Full);
            hazards.clear(self.index, KEY_HAZARD);
            self.retire(old_value);
            table.sink.on_transition(Transition::Update, started.elapsed());
            if let Some(episode) = tracker.episode(true) {
                table.sink.on_spin_episode(episode);
            }
            return UpdateOutcome::Done;
        }
    }

    /// Delete `key`. Idempotent; absence is a silent success.
    pub fn del(&mut self, key: &str) {
        let table = self.table;
        let hazards = &table.hazards;

        for index in ProbeSeq::new(key, table.config.capacity) {
            let bucket = &table.buckets[index];
            match bucket.state() {
                SlotState::Empty => return,
                SlotState::Full => {}
                _ => continue,
            }

            let protected = hazards.protect(self.index, KEY_HAZARD, bucket.key_cell());
            if protected.is_null() {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }
            // SAFETY: pinned by our key hazard; published strings are
            // immutable.
            if unsafe { (*protected).as_str() } != key {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }
            if !ptr::eq(protected, bucket.key_ptr()) {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }

            if bucket.begin(SlotState::Full, SlotState::Expunging).is_err() {
                hazards.clear(self.index, KEY_HAZARD);
                continue;
            }

            let started = Instant::now();

            if !ptr::eq(protected, bucket.key_ptr()) {
                // Someone displaced the key between our check and the CAS
                // win; the delete we came for already happened.
                bucket.finish(SlotState::Deleted);
                hazards.clear(self.index, KEY_HAZARD);
                table
                    .sink
                    .on_transition(Transition::RemoveAbort, started.elapsed());
                return;
            }

            let old_key = bucket.exchange_key(ptr::null_mut());
            let old_value = bucket.exchange_value(ptr::null_mut());
            bucket.finish(SlotState::Deleted);
            hazards.clear_both(self.index);
            self.retire(old_key);
            self.retire(old_value);
            table.sink.on_transition(Transition::Remove, started.elapsed());
            return;
        }
    }

    /// Queue a displaced pointer for deferred deletion, sweeping the lists
    /// once the batch threshold is reached.
    fn retire(&mut self, ptr: *mut String) {
        self.retired.push(ptr);
        if self.retired.len() >= self.table.config.retire_batch {
            self.retired.scan(&self.table.hazards);
            self.table.orphans.try_sweep(&self.table.hazards);
        }
    }
}

impl Drop for Worker<'_> {
    fn drop(&mut self) {
        let hazards = &self.table.hazards;
        // Our own hazards must go first so they don't block our own scan.
        hazards.clear_both(self.index);
        self.retired.scan(hazards);
        if !self.retired.is_empty() {
            // Still pinned by someone else; later sweeps pick these up.
            self.table.orphans.adopt(self.retired.take_all());
        }
        hazards.release(self.index);
    }
}

fn heap(s: &str) -> *mut String {
    Box::into_raw(Box::new(String::from(s)))
}
