//! Bundled in-memory reference engine.
//!
//! An ordered map under a read-write lock. Iterators materialize the
//! requested range at creation, which gives exactly the stable-view
//! contract of [`Engine::iter`]. The `fail_next_write` hook lets tests
//! inject a commit failure without reaching into internals.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use kite_core::{Error, Result};

use crate::batch::{BatchOp, WriteBatch};
use crate::traits::{Direction, Engine, EngineIter, IterOptions};

/// In-memory ordered engine.
#[derive(Default)]
pub struct MemEngine {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_next_write: AtomicBool,
}

impl MemEngine {
    /// Create an empty engine.
    pub fn new() -> MemEngine {
        MemEngine::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Make the next `write` fail atomically. Test hook.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    fn bounds_are_valid(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
        let lo = match lower {
            Bound::Included(k) | Bound::Excluded(k) => k,
            Bound::Unbounded => return true,
        };
        let hi = match upper {
            Bound::Included(k) | Bound::Excluded(k) => k,
            Bound::Unbounded => return true,
        };
        if lo > hi {
            return false;
        }
        if lo == hi {
            // BTreeMap::range panics on equal ends unless both are inclusive
            return matches!(lower, Bound::Included(_)) && matches!(upper, Bound::Included(_));
        }
        true
    }
}

impl Engine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(Error::storage("injected write failure"));
        }
        let mut map = self.map.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter(&self, opts: IterOptions) -> EngineIter {
        if !Self::bounds_are_valid(&opts.lower, &opts.upper) {
            return Box::new(std::iter::empty());
        }
        let map = self.map.read();
        let range = map.range::<[u8], _>((
            ref_bound(&opts.lower),
            ref_bound(&opts.upper),
        ));
        let limit = usize::try_from(opts.limit).unwrap_or(usize::MAX);
        let entries: Vec<(Vec<u8>, Vec<u8>)> = match opts.direction {
            Direction::Forward => range
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Direction::Reverse => range
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        Box::new(entries.into_iter())
    }
}

fn ref_bound(b: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match b {
        Bound::Included(k) => Bound::Included(k.as_slice()),
        Bound::Excluded(k) => Bound::Excluded(k.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}
