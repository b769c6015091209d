//! Plain key-value operations.
//!
//! Every mutator opens a [`crate::Transaction`], stages the data write
//! and one binlog record built from the encoded engine key, then commits
//! both atomically.

use tracing::warn;

use kite_core::codec::encode_kv_key;
use kite_core::strings::parse_i64;
use kite_core::{Error, LogCommand, LogType, Result};

use crate::iterator::KvIterator;
use crate::store::Store;

impl Store {
    /// Read a value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.raw_get(&encode_kv_key(key))
    }

    /// Set a value. An empty key is a logged no-op.
    pub fn set(&self, key: &[u8], value: &[u8], log_type: LogType) -> Result<()> {
        if key.is_empty() {
            warn!("set with empty key ignored");
            return Ok(());
        }
        let mut tx = self.binlog().transaction();
        let ekey = encode_kv_key(key);
        tx.put(ekey.clone(), value.to_vec());
        tx.add_log(log_type, LogCommand::KSet, &ekey);
        tx.commit()
    }

    /// Set only when the key is absent. Returns true when the write landed.
    pub fn setnx(&self, key: &[u8], value: &[u8], log_type: LogType) -> Result<bool> {
        if key.is_empty() {
            warn!("setnx with empty key ignored");
            return Ok(false);
        }
        let mut tx = self.binlog().transaction();
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        let ekey = encode_kv_key(key);
        tx.put(ekey.clone(), value.to_vec());
        tx.add_log(log_type, LogCommand::KSet, &ekey);
        tx.commit()?;
        Ok(true)
    }

    /// Set a value and return the previous one.
    pub fn getset(
        &self,
        key: &[u8],
        value: &[u8],
        log_type: LogType,
    ) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            warn!("getset with empty key ignored");
            return Ok(None);
        }
        let mut tx = self.binlog().transaction();
        let old = self.get(key)?;
        let ekey = encode_kv_key(key);
        tx.put(ekey.clone(), value.to_vec());
        tx.add_log(log_type, LogCommand::KSet, &ekey);
        tx.commit()?;
        Ok(old)
    }

    /// Delete a key.
    pub fn del(&self, key: &[u8], log_type: LogType) -> Result<()> {
        let mut tx = self.binlog().transaction();
        let ekey = encode_kv_key(key);
        tx.delete(ekey.clone());
        tx.add_log(log_type, LogCommand::KDel, &ekey);
        tx.commit()
    }

    /// Add `by` to the integer stored at `key`.
    ///
    /// A missing key counts from zero. A value that does not parse as a
    /// decimal integer is left untouched and the call reports `None`
    /// instead of applying.
    pub fn incr(&self, key: &[u8], by: i64, log_type: LogType) -> Result<Option<i64>> {
        let mut tx = self.binlog().transaction();
        let new_val = match self.get(key)? {
            None => by,
            Some(old) => {
                let old = match parse_i64(&old) {
                    None => return Ok(None),
                    Some(v) => v,
                };
                old.checked_add(by)
                    .ok_or_else(|| Error::invalid_input("increment overflows"))?
            }
        };
        let ekey = encode_kv_key(key);
        tx.put(ekey.clone(), new_val.to_string().into_bytes());
        tx.add_log(log_type, LogCommand::KSet, &ekey);
        tx.commit()?;
        Ok(Some(new_val))
    }

    /// Set several keys in one commit with one binlog record each.
    ///
    /// An empty key aborts the whole batch; nothing is written.
    pub fn multi_set(&self, kvs: &[(Vec<u8>, Vec<u8>)], log_type: LogType) -> Result<usize> {
        let mut tx = self.binlog().transaction();
        for (key, value) in kvs {
            if key.is_empty() {
                warn!("multi_set with empty key aborted");
                return Ok(0);
            }
            let ekey = encode_kv_key(key);
            tx.put(ekey.clone(), value.clone());
            tx.add_log(log_type, LogCommand::KSet, &ekey);
        }
        tx.commit()?;
        Ok(kvs.len())
    }

    /// Delete several keys in one commit with one binlog record each.
    pub fn multi_del(&self, keys: &[Vec<u8>], log_type: LogType) -> Result<usize> {
        let mut tx = self.binlog().transaction();
        for key in keys {
            let ekey = encode_kv_key(key);
            tx.delete(ekey.clone());
            tx.add_log(log_type, LogCommand::KDel, &ekey);
        }
        tx.commit()?;
        Ok(keys.len())
    }

    /// Set one bit of the value and return its previous state.
    pub fn setbit(
        &self,
        key: &[u8],
        bit_offset: usize,
        on: bool,
        log_type: LogType,
    ) -> Result<bool> {
        if key.is_empty() {
            warn!("setbit with empty key ignored");
            return Ok(false);
        }
        let mut tx = self.binlog().transaction();
        let mut value = self.get(key)?.unwrap_or_default();
        let byte = bit_offset / 8;
        let bit = bit_offset % 8;
        if byte >= value.len() {
            value.resize(byte + 1, 0);
        }
        let orig = value[byte] & (1 << bit) != 0;
        if on {
            value[byte] |= 1 << bit;
        } else {
            value[byte] &= !(1 << bit);
        }
        let ekey = encode_kv_key(key);
        tx.put(ekey.clone(), value);
        tx.add_log(log_type, LogCommand::KSet, &ekey);
        tx.commit()?;
        Ok(orig)
    }

    /// Read one bit of the value; bits past the end read as zero.
    pub fn getbit(&self, key: &[u8], bit_offset: usize) -> Result<bool> {
        let value = self.get(key)?.unwrap_or_default();
        let byte = bit_offset / 8;
        let bit = bit_offset % 8;
        if byte >= value.len() {
            return Ok(false);
        }
        Ok(value[byte] & (1 << bit) != 0)
    }

    /// Scan keys in `(start, end]`, ascending.
    pub fn scan(&self, start: &[u8], end: &[u8], limit: u64) -> KvIterator {
        self.scan_inner(start, end, limit, true)
    }

    /// Scan key names only, ascending.
    pub fn keys(&self, start: &[u8], end: &[u8], limit: u64) -> KvIterator {
        self.scan_inner(start, end, limit, false)
    }

    fn scan_inner(&self, start: &[u8], end: &[u8], limit: u64, values: bool) -> KvIterator {
        let key_start = encode_kv_key(start);
        let key_end = if end.is_empty() {
            Vec::new()
        } else {
            encode_kv_key(end)
        };
        KvIterator::new(self.fwd_range(&key_start, &key_end, limit), values)
    }

    /// Scan keys below `start` down to `end`, descending.
    pub fn rscan(&self, start: &[u8], end: &[u8], limit: u64) -> KvIterator {
        self.rscan_inner(start, end, limit, true)
    }

    /// Scan key names only, descending.
    pub fn rkeys(&self, start: &[u8], end: &[u8], limit: u64) -> KvIterator {
        self.rscan_inner(start, end, limit, false)
    }

    fn rscan_inner(&self, start: &[u8], end: &[u8], limit: u64, values: bool) -> KvIterator {
        let mut key_start = encode_kv_key(start);
        if start.is_empty() {
            key_start.push(0xff);
        }
        let key_end = if end.is_empty() {
            Vec::new()
        } else {
            encode_kv_key(end)
        };
        KvIterator::new(self.rev_range(&key_start, &key_end, limit), values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_engine::MemEngine;
    use std::sync::Arc;

    fn store() -> Store {
        Store::open(Arc::new(MemEngine::new()))
    }

    #[test]
    fn test_set_get_del() {
        let s = store();
        s.set(b"foo", b"bar", LogType::Sync).unwrap();
        assert_eq!(s.get(b"foo").unwrap(), Some(b"bar".to_vec()));
        s.del(b"foo", LogType::Sync).unwrap();
        assert_eq!(s.get(b"foo").unwrap(), None);
    }

    #[test]
    fn test_set_writes_one_binlog_record() {
        let s = store();
        s.set(b"foo", b"bar", LogType::Sync).unwrap();
        let log = s.binlog().find_last().unwrap().unwrap();
        assert_eq!(log.seq(), 1);
        assert_eq!(log.cmd(), LogCommand::KSet);
        assert_eq!(log.log_type(), LogType::Sync);
        assert_eq!(log.key(), encode_kv_key(b"foo").as_slice());
    }

    #[test]
    fn test_set_empty_key_is_noop() {
        let s = store();
        s.set(b"", b"bar", LogType::Sync).unwrap();
        assert_eq!(s.binlog().last_seq(), 0);
    }

    #[test]
    fn test_injected_failure_leaves_nothing() {
        let engine = Arc::new(MemEngine::new());
        let s = Store::open(engine.clone());
        engine.fail_next_write();
        assert!(s.set(b"foo", b"bar", LogType::Sync).is_err());
        assert_eq!(s.get(b"foo").unwrap(), None);
        assert!(s.binlog().find_last().unwrap().is_none());
    }

    #[test]
    fn test_setnx() {
        let s = store();
        assert!(s.setnx(b"k", b"1", LogType::Sync).unwrap());
        assert!(!s.setnx(b"k", b"2", LogType::Sync).unwrap());
        assert_eq!(s.get(b"k").unwrap(), Some(b"1".to_vec()));
        // the losing setnx wrote no binlog record
        assert_eq!(s.binlog().last_seq(), 1);
    }

    #[test]
    fn test_getset() {
        let s = store();
        assert_eq!(s.getset(b"k", b"1", LogType::Sync).unwrap(), None);
        assert_eq!(
            s.getset(b"k", b"2", LogType::Sync).unwrap(),
            Some(b"1".to_vec())
        );
        assert_eq!(s.get(b"k").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_incr() {
        let s = store();
        assert_eq!(s.incr(b"n", 5, LogType::Sync).unwrap(), Some(5));
        assert_eq!(s.incr(b"n", -2, LogType::Sync).unwrap(), Some(3));
        assert_eq!(s.get(b"n").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_incr_not_numeric_is_a_noop() {
        let s = store();
        s.set(b"n", b"abc", LogType::Sync).unwrap();
        assert_eq!(s.incr(b"n", 1, LogType::Sync).unwrap(), None);
        assert_eq!(s.get(b"n").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(s.binlog().last_seq(), 1);
    }

    #[test]
    fn test_multi_set_and_scan_order() {
        let s = store();
        let kvs = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ];
        assert_eq!(s.multi_set(&kvs, LogType::Sync).unwrap(), 3);
        assert_eq!(s.binlog().last_seq(), 3);

        let keys: Vec<Vec<u8>> = s.keys(b"", b"", 10).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_multi_set_empty_key_aborts_batch() {
        let s = store();
        let kvs = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (Vec::new(), b"2".to_vec()),
        ];
        assert_eq!(s.multi_set(&kvs, LogType::Sync).unwrap(), 0);
        assert_eq!(s.get(b"a").unwrap(), None);
        assert_eq!(s.binlog().last_seq(), 0);
    }

    #[test]
    fn test_multi_del() {
        let s = store();
        s.set(b"a", b"1", LogType::Sync).unwrap();
        s.set(b"b", b"2", LogType::Sync).unwrap();
        let n = s
            .multi_del(&[b"a".to_vec(), b"b".to_vec()], LogType::Sync)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(s.get(b"a").unwrap(), None);
        assert_eq!(s.get(b"b").unwrap(), None);
    }

    #[test]
    fn test_scan_bounds() {
        let s = store();
        for k in [&b"a"[..], b"b", b"c", b"d"] {
            s.set(k, b"v", LogType::Sync).unwrap();
        }
        // start exclusive, end inclusive
        let keys: Vec<Vec<u8>> = s.scan(b"a", b"c", 10).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
        // limit applies
        let keys: Vec<Vec<u8>> = s.scan(b"", b"", 2).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_rscan() {
        let s = store();
        for k in [&b"a"[..], b"b", b"c"] {
            s.set(k, b"v", LogType::Sync).unwrap();
        }
        let keys: Vec<Vec<u8>> = s.rscan(b"", b"", 10).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
        let keys: Vec<Vec<u8>> = s.rscan(b"c", b"b", 10).map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"b".to_vec()]);
    }

    #[test]
    fn test_setbit_getbit() {
        let s = store();
        assert!(!s.setbit(b"bits", 7, true, LogType::Sync).unwrap());
        assert!(s.getbit(b"bits", 7).unwrap());
        assert!(!s.getbit(b"bits", 6).unwrap());
        assert!(!s.getbit(b"bits", 100).unwrap());
        assert!(s.setbit(b"bits", 7, false, LogType::Sync).unwrap());
        assert!(!s.getbit(b"bits", 7).unwrap());
    }

    #[test]
    fn test_keys_returns_no_values() {
        let s = store();
        s.set(b"a", b"big-value", LogType::Sync).unwrap();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = s.keys(b"", b"", 10).collect();
        assert_eq!(entries, vec![(b"a".to_vec(), Vec::new())]);
    }
}
