//! Petek: a fixed-capacity lock-free concurrent string table.
//!
//! Petek stores string→string mappings in a fixed array of cache-padded
//! buckets, probed by double hashing. Readers are wait-free past hazard
//! publication; writers are lock-free, serialized per bucket by a small
//! intent-state machine instead of a mutex. Displaced keys and values are
//! reclaimed with hazard pointers, so a reader never dereferences freed
//! memory and a writer never frees what a reader still holds.
//!
//! # Key Features
//!
//! - **Wait-free reads**: a `get` is a probe, two hazard publications and a
//!   clone; no locks, no allocation on miss
//! - **Lock-free writes**: one CAS winner per bucket transition, losers
//!   probe on or back off
//! - **Safe reclamation**: per-worker retired lists swept against the
//!   hazard array; freed exactly once, never while protected
//! - **Fixed footprint**: bucket and hazard arrays are sized at
//!   construction and never reallocated
//!
//! # Example
//!
//! ```rust
//! use petek::Table;
//!
//! let table = Table::new();
//! let mut worker = table.register().unwrap();
//!
//! worker.set("coffee", "turkish").unwrap();
//! assert_eq!(worker.get("coffee").as_deref(), Some("turkish"));
//!
//! worker.del("coffee");
//! assert_eq!(worker.get("coffee"), None);
//! ```

#![warn(missing_docs)]

mod backoff;
mod bucket;
mod error;
mod hazard;
mod metrics;
pub mod probe;
mod retired;
mod table;

pub use backoff::CooldownSchedule;
pub use error::Error;
pub use metrics::{MetricsSink, NoopSink, SpinEpisode, Transition};
pub use table::{Table, TableConfig, Worker};
