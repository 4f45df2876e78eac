//! Counter hooks for an external metrics collaborator.
//!
//! The core reports what happened and how long it took; whether anything
//! is collected, aggregated or dropped is the sink's business. The default
//! sink ignores everything, and correctness never depends on a sink.

use std::time::Duration;

/// A completed bucket transition, including the abort variants.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Transition {
    /// `Empty → Inserting → Full`: insert into a never-used bucket.
    InsertEmpty,
    /// `Deleted → Inserting → Full`: reinsert over a tombstone.
    InsertTombstone,
    /// `Full → Updating → Full`: value replaced under the same key.
    Update,
    /// `Full → Updating → Full`: the winner found a different key after
    /// the CAS; the bucket's current tenant is untouched.
    UpdateAbortSwapped,
    /// `Full → Updating → Deleted`: the winner found the key gone after
    /// the CAS; the tombstone is made visible.
    UpdateAbortDeleted,
    /// `Full → Expunging → Deleted`: delete.
    Remove,
    /// `Full → Expunging → Deleted`: the key was already displaced when
    /// the winner re-checked; nothing retired.
    RemoveAbort,
}

/// One spin episode inside a contested `set`.
#[derive(Clone, Copy, Debug)]
pub struct SpinEpisode {
    /// Contested state observations before the episode ended.
    pub spins: u32,
    /// Cooldown sleeps taken.
    pub sleeps: u32,
    /// Wall time from first contested observation to resolution.
    pub elapsed: Duration,
    /// Whether the episode ended in a completed update (vs an abort).
    pub success: bool,
}

/// Receiver for the core's counter call-outs.
pub trait MetricsSink: Send + Sync {
    /// A transition completed, taking `elapsed` from intent-CAS win to
    /// terminal store.
    fn on_transition(&self, transition: Transition, elapsed: Duration) {
        let _ = (transition, elapsed);
    }

    /// A `set` finished a spin episode, successfully or not.
    fn on_spin_episode(&self, episode: SpinEpisode) {
        let _ = episode;
    }
}

/// Sink that drops everything.
pub struct NoopSink;

impl MetricsSink for NoopSink {}
