//! The engine trait and iterator options.

use std::ops::Bound;

use kite_core::Result;

use crate::batch::WriteBatch;

/// Scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending key order.
    Forward,
    /// Descending key order.
    Reverse,
}

/// Unbounded iteration.
pub const NO_LIMIT: u64 = u64::MAX;

/// Range, direction and limit for an engine scan.
#[derive(Debug, Clone)]
pub struct IterOptions {
    /// Lower key bound.
    pub lower: Bound<Vec<u8>>,
    /// Upper key bound.
    pub upper: Bound<Vec<u8>>,
    /// Scan direction.
    pub direction: Direction,
    /// Maximum number of entries yielded.
    pub limit: u64,
}

impl IterOptions {
    /// Forward scan over `(lower, upper)`.
    pub fn forward(lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, limit: u64) -> IterOptions {
        IterOptions {
            lower,
            upper,
            direction: Direction::Forward,
            limit,
        }
    }

    /// Reverse scan over `(lower, upper)`.
    pub fn reverse(lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>, limit: u64) -> IterOptions {
        IterOptions {
            lower,
            upper,
            direction: Direction::Reverse,
            limit,
        }
    }
}

/// Engine scan handle.
///
/// An iterator is a stable view: keys committed after its creation are
/// never observed. Replication's COPY phase depends on this.
pub type EngineIter = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send>;

/// An embedded ordered key-value engine.
///
/// Implementations must provide atomic batched writes and snapshot-stable
/// iterators in both directions. Reads never block writers.
pub trait Engine: Send + Sync + 'static {
    /// Point read.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply every operation in `batch` atomically, in order.
    ///
    /// On error nothing from the batch is visible.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Open a range scan.
    fn iter(&self, opts: IterOptions) -> EngineIter;
}
