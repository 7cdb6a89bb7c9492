//! Versioned rows and the optimistic-concurrency guard stores apply to them.

use core::fmt;

/// A record that stores read, modify and write back as one unit.
///
/// Concurrent writers are told apart by `version()`: a store accepts a write
/// only when the row it replaces still carries the version the writer read,
/// and bumps the version by one when it does.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of successful writes since the row was created (0 before the first).
    fn version(&self) -> u64;
}

/// What a writer believes the stored version to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Last writer wins.
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    /// Expect exactly the version `row` was read at.
    pub fn of<A: AggregateRoot + ?Sized>(row: &A) -> Self {
        ExpectedVersion::Exact(row.version())
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any version"),
            ExpectedVersion::Exact(v) => write!(f, "version {v}"),
        }
    }
}
