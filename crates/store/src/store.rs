//! The store handle and raw engine access.

use std::ops::Bound;
use std::sync::Arc;

use kite_core::consts::tag;
use kite_core::limits::default_binlog_capacity;
use kite_core::Result;
use kite_engine::{Engine, EngineIter, IterOptions};

use crate::binlog::BinlogQueue;

/// Typed storage over one engine plus its binlog queue.
///
/// Cheap to clone; all state lives in the engine.
#[derive(Clone)]
pub struct Store {
    engine: Arc<dyn Engine>,
    binlog: Arc<BinlogQueue>,
}

impl Store {
    /// Open a store with the binlog enabled at the default capacity.
    pub fn open(engine: Arc<dyn Engine>) -> Store {
        Store::open_with_capacity(engine, default_binlog_capacity())
    }

    /// Open a store with the binlog enabled at a custom capacity.
    pub fn open_with_capacity(engine: Arc<dyn Engine>, capacity: u64) -> Store {
        let binlog = Arc::new(BinlogQueue::open(Arc::clone(&engine), true, capacity));
        Store { engine, binlog }
    }

    /// Open a metadata store: no binlog records, no cleaner thread.
    pub fn open_meta(engine: Arc<dyn Engine>) -> Store {
        let binlog = Arc::new(BinlogQueue::open(Arc::clone(&engine), false, 0));
        Store { engine, binlog }
    }

    /// The binlog queue.
    pub fn binlog(&self) -> &Arc<BinlogQueue> {
        &self.binlog
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Read an entry by its exact engine key.
    pub fn raw_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.get(key)
    }

    /// Write an entry by its exact engine key, without a binlog record.
    pub fn raw_set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut tx = self.binlog.transaction();
        tx.put(key.to_vec(), value.to_vec());
        tx.commit()
    }

    /// Delete an entry by its exact engine key, without a binlog record.
    pub fn raw_del(&self, key: &[u8]) -> Result<()> {
        let mut tx = self.binlog.transaction();
        tx.delete(key.to_vec());
        tx.commit()
    }

    /// Forward scan with the store's bound convention: `start` exclusive,
    /// `end` inclusive, empty `end` unbounded.
    pub(crate) fn fwd_range(&self, start: &[u8], end: &[u8], limit: u64) -> EngineIter {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(end.to_vec())
        };
        self.engine.iter(IterOptions::forward(
            Bound::Excluded(start.to_vec()),
            upper,
            limit,
        ))
    }

    /// Reverse scan: first key strictly below `start`, down to `end`
    /// inclusive, empty `end` unbounded.
    pub(crate) fn rev_range(&self, start: &[u8], end: &[u8], limit: u64) -> EngineIter {
        let lower = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(end.to_vec())
        };
        self.engine.iter(IterOptions::reverse(
            lower,
            Bound::Excluded(start.to_vec()),
            limit,
        ))
    }

    /// Raw dump scan used by the bulk dump facility: `start` exclusive,
    /// `end` inclusive-or-unbounded, bounded by `limit`.
    pub fn dump_range(&self, start: &[u8], end: &[u8], limit: u64) -> EngineIter {
        self.fwd_range(start, end, limit)
    }

    /// Full keyspace iterator for replication COPY, resuming after
    /// `last_key`. Starts at the user-data tag window when `last_key` is
    /// empty; the caller stops once keys leave the window.
    pub fn copy_iter(&self, last_key: &[u8]) -> EngineIter {
        let start = if last_key.is_empty() {
            vec![tag::MIN_PREFIX]
        } else {
            last_key.to_vec()
        };
        self.engine.iter(IterOptions::forward(
            Bound::Excluded(start),
            Bound::Unbounded,
            u64::MAX,
        ))
    }
}

/// Encode a size counter value (8-byte little-endian i64).
pub(crate) fn encode_size(size: i64) -> Vec<u8> {
    size.to_le_bytes().to_vec()
}

/// Decode a size counter value; anything but 8 bytes reads as `None`.
pub(crate) fn decode_size(value: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}

/// Encode a queue sequence pointer (8-byte little-endian u64).
pub(crate) fn encode_seq(seq: u64) -> Vec<u8> {
    seq.to_le_bytes().to_vec()
}

/// Decode a queue sequence pointer.
pub(crate) fn decode_seq(value: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_engine::MemEngine;

    #[test]
    fn test_raw_ops() {
        let store = Store::open(Arc::new(MemEngine::new()));
        store.raw_set(b"meta.key", b"v").unwrap();
        assert_eq!(store.raw_get(b"meta.key").unwrap(), Some(b"v".to_vec()));
        store.raw_del(b"meta.key").unwrap();
        assert_eq!(store.raw_get(b"meta.key").unwrap(), None);
        // raw writes produce no binlog records
        assert_eq!(store.binlog().last_seq(), 0);
    }

    #[test]
    fn test_size_codec() {
        assert_eq!(decode_size(&encode_size(42)), Some(42));
        assert_eq!(decode_size(&encode_size(-1)), Some(-1));
        assert_eq!(decode_size(b"short"), None);
        assert_eq!(decode_seq(&encode_seq(u64::MAX)), Some(u64::MAX));
    }

    #[test]
    fn test_fwd_range_is_start_exclusive() {
        let store = Store::open(Arc::new(MemEngine::new()));
        store.raw_set(b"a", b"1").unwrap();
        store.raw_set(b"b", b"2").unwrap();
        let keys: Vec<Vec<u8>> = store.fwd_range(b"a", b"", u64::MAX).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec()]);
    }

    #[test]
    fn test_rev_range_excludes_start() {
        let store = Store::open(Arc::new(MemEngine::new()));
        store.raw_set(b"a", b"1").unwrap();
        store.raw_set(b"b", b"2").unwrap();
        store.raw_set(b"c", b"3").unwrap();
        let keys: Vec<Vec<u8>> = store.rev_range(b"c", b"", u64::MAX).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"a".to_vec()]);
    }
}
