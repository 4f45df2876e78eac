use std::fmt;

/// Typed errors for table operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every hazard record is claimed; no more workers can register
    NoHazardSlot,
    /// A `set` walked the full probe sequence without finding a home
    TableFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoHazardSlot => {
                write!(f, "no hazard slots available: worker limit reached")
            }
            Error::TableFull => {
                write!(f, "table full: no empty, deleted or matching bucket on the probe path")
            }
        }
    }
}

impl std::error::Error for Error {}
