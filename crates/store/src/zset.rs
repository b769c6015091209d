//! Sorted-set (name → key → score) operations.
//!
//! Each member is stored twice: once under the member key with the score
//! as its ASCII value, and once in a by-score index entry with an empty
//! value. The two entries move together inside one transaction, so the
//! pair invariant holds at every commit point.

use tracing::warn;

use kite_core::codec::{decode_zsize_key, encode_zscore_key, encode_zset_key, encode_zsize_key};
use kite_core::consts::tag;
use kite_core::limits::{KEY_LEN_MAX, NAME_LEN_MAX};
use kite_core::strings::parse_i64;
use kite_core::{Error, LogCommand, LogType, Result};

use crate::hash::collect_names;
use crate::iterator::ZsetIterator;
use crate::store::{decode_size, encode_size, Store};
use crate::{Insertion, Transaction};

use kite_engine::traits::NO_LIMIT;

impl Store {
    /// Read a member's score.
    pub fn zget(&self, name: &[u8], key: &[u8]) -> Result<Option<i64>> {
        match self.raw_get(&encode_zset_key(name, key))? {
            None => Ok(None),
            Some(v) => parse_i64(&v)
                .map(Some)
                .ok_or_else(|| Error::corruption("malformed stored score")),
        }
    }

    /// Insert or update a member. Equal score is a no-op.
    pub fn zset(&self, name: &[u8], key: &[u8], score: i64, log_type: LogType) -> Result<Insertion> {
        let mut tx = self.binlog().transaction();
        let ret = self.zset_one(&mut tx, name, key, score, log_type)?;
        if ret == Some(Insertion::Inserted) {
            self.incr_zsize(&mut tx, name, 1)?;
        }
        tx.commit()?;
        Ok(ret.unwrap_or(Insertion::Updated))
    }

    /// Delete a member. Returns whether it existed.
    pub fn zdel(&self, name: &[u8], key: &[u8], log_type: LogType) -> Result<bool> {
        let mut tx = self.binlog().transaction();
        let existed = self.zdel_one(&mut tx, name, key, log_type)?;
        if existed {
            self.incr_zsize(&mut tx, name, -1)?;
        }
        tx.commit()?;
        Ok(existed)
    }

    /// Add `by` to a member's score, creating it at `by` when absent.
    pub fn zincr(&self, name: &[u8], key: &[u8], by: i64, log_type: LogType) -> Result<i64> {
        let mut tx = self.binlog().transaction();
        let new_score = match self.zget(name, key)? {
            None => by,
            Some(old) => old
                .checked_add(by)
                .ok_or_else(|| Error::invalid_input("score overflows"))?,
        };
        let ret = self.zset_one(&mut tx, name, key, new_score, log_type)?;
        if ret == Some(Insertion::Inserted) {
            self.incr_zsize(&mut tx, name, 1)?;
        }
        tx.commit()?;
        Ok(new_score)
    }

    /// Number of members. Missing or malformed counters read 0.
    pub fn zsize(&self, name: &[u8]) -> Result<i64> {
        match self.raw_get(&encode_zsize_key(name))? {
            None => Ok(0),
            Some(v) => Ok(decode_size(&v).unwrap_or(0).max(0)),
        }
    }

    /// Zero-based position of `key` in ascending score order.
    ///
    /// O(n): walks the by-score index from the low end.
    pub fn zrank(&self, name: &[u8], key: &[u8]) -> Result<Option<u64>> {
        Ok(rank_of(self.ziterator(name, b"", None, None, NO_LIMIT, false), key))
    }

    /// Zero-based position of `key` in descending score order.
    pub fn zrrank(&self, name: &[u8], key: &[u8]) -> Result<Option<u64>> {
        Ok(rank_of(self.ziterator(name, b"", None, None, NO_LIMIT, true), key))
    }

    /// Members from `offset`, ascending by score.
    pub fn zrange(&self, name: &[u8], offset: u64, limit: u64) -> ZsetIterator {
        let total = offset.saturating_add(limit);
        let mut it = self.ziterator(name, b"", None, None, total, false);
        it.skip_n(offset);
        it
    }

    /// Members from `offset`, descending by score.
    pub fn zrrange(&self, name: &[u8], offset: u64, limit: u64) -> ZsetIterator {
        let total = offset.saturating_add(limit);
        let mut it = self.ziterator(name, b"", None, None, total, true);
        it.skip_n(offset);
        it
    }

    /// Scan ascending from `(key_start, score_start)` up to `score_end`.
    ///
    /// When only `key_start` is given, its stored score seeds the cursor.
    pub fn zscan(
        &self,
        name: &[u8],
        key_start: &[u8],
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: u64,
    ) -> Result<ZsetIterator> {
        let score_start = self.seed_score(name, key_start, score_start)?;
        Ok(self.ziterator(name, key_start, score_start, score_end, limit, false))
    }

    /// Scan descending from `(key_start, score_start)` down to `score_end`.
    pub fn zrscan(
        &self,
        name: &[u8],
        key_start: &[u8],
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: u64,
    ) -> Result<ZsetIterator> {
        let score_start = self.seed_score(name, key_start, score_start)?;
        Ok(self.ziterator(name, key_start, score_start, score_end, limit, true))
    }

    /// List sorted-set names ascending.
    pub fn zlist(&self, name_start: &[u8], name_end: &[u8], limit: u64) -> Result<Vec<Vec<u8>>> {
        let start = encode_zsize_key(name_start);
        let end = if name_end.is_empty() {
            Vec::new()
        } else {
            encode_zsize_key(name_end)
        };
        Ok(collect_names(
            self.fwd_range(&start, &end, limit),
            tag::ZSIZE,
            decode_zsize_key,
        ))
    }

    /// List sorted-set names descending.
    pub fn zrlist(&self, name_start: &[u8], name_end: &[u8], limit: u64) -> Result<Vec<Vec<u8>>> {
        let mut start = encode_zsize_key(name_start);
        if name_start.is_empty() {
            start.push(0xff);
        }
        let end = if name_end.is_empty() {
            Vec::new()
        } else {
            encode_zsize_key(name_end)
        };
        Ok(collect_names(
            self.rev_range(&start, &end, limit),
            tag::ZSIZE,
            decode_zsize_key,
        ))
    }

    /// Delete every member. Returns members removed.
    pub fn zclear(&self, name: &[u8], log_type: LogType) -> Result<u64> {
        let mut count = 0u64;
        loop {
            let keys: Vec<Vec<u8>> = self
                .ziterator(name, b"", None, None, 1000, false)
                .map(|(k, _)| k)
                .collect();
            if keys.is_empty() {
                return Ok(count);
            }
            for key in keys {
                self.zdel(name, &key, log_type)?;
                count += 1;
            }
        }
    }

    fn seed_score(
        &self,
        name: &[u8],
        key_start: &[u8],
        score_start: Option<i64>,
    ) -> Result<Option<i64>> {
        if !key_start.is_empty() && score_start.is_none() {
            self.zget(name, key_start)
        } else {
            Ok(score_start)
        }
    }

    fn ziterator(
        &self,
        name: &[u8],
        key_start: &[u8],
        score_start: Option<i64>,
        score_end: Option<i64>,
        limit: u64,
        reverse: bool,
    ) -> ZsetIterator {
        if !reverse {
            let start = encode_zscore_key(name, key_start, score_start.unwrap_or(i64::MIN));
            let end = encode_zscore_key(name, b"\xff", score_end.unwrap_or(i64::MAX));
            ZsetIterator::new(self.fwd_range(&start, &end, limit))
        } else {
            let start = match score_start {
                None => encode_zscore_key(name, key_start, i64::MAX),
                Some(s) if key_start.is_empty() => encode_zscore_key(name, b"\xff", s),
                Some(s) => encode_zscore_key(name, key_start, s),
            };
            let end = encode_zscore_key(name, b"", score_end.unwrap_or(i64::MIN));
            ZsetIterator::new(self.rev_range(&start, &end, limit))
        }
    }

    fn zset_one(
        &self,
        tx: &mut Transaction<'_>,
        name: &[u8],
        key: &[u8],
        score: i64,
        log_type: LogType,
    ) -> Result<Option<Insertion>> {
        if name.is_empty() || key.is_empty() {
            warn!("zset with empty name or key ignored");
            return Ok(None);
        }
        if name.len() > NAME_LEN_MAX || key.len() > KEY_LEN_MAX {
            return Err(Error::invalid_input("oversized zset name/key"));
        }
        let old_score = self.zget(name, key)?;
        if old_score == Some(score) {
            return Ok(Some(Insertion::Updated));
        }
        if let Some(old) = old_score {
            tx.delete(encode_zscore_key(name, key, old));
        }
        tx.put(encode_zscore_key(name, key, score), Vec::new());
        let ekey = encode_zset_key(name, key);
        tx.put(ekey.clone(), score.to_string().into_bytes());
        tx.add_log(log_type, LogCommand::ZSet, &ekey);
        Ok(Some(if old_score.is_none() {
            Insertion::Inserted
        } else {
            Insertion::Updated
        }))
    }

    fn zdel_one(
        &self,
        tx: &mut Transaction<'_>,
        name: &[u8],
        key: &[u8],
        log_type: LogType,
    ) -> Result<bool> {
        if name.len() > NAME_LEN_MAX || key.len() > KEY_LEN_MAX {
            return Err(Error::invalid_input("oversized zset name/key"));
        }
        let old_score = match self.zget(name, key)? {
            None => return Ok(false),
            Some(s) => s,
        };
        tx.delete(encode_zscore_key(name, key, old_score));
        let ekey = encode_zset_key(name, key);
        tx.delete(ekey.clone());
        tx.add_log(log_type, LogCommand::ZDel, &ekey);
        Ok(true)
    }

    fn incr_zsize(&self, tx: &mut Transaction<'_>, name: &[u8], delta: i64) -> Result<()> {
        let size = self.zsize(name)? + delta;
        let size_key = encode_zsize_key(name);
        if size <= 0 {
            tx.delete(size_key);
        } else {
            tx.put(size_key, encode_size(size));
        }
        Ok(())
    }
}

fn rank_of(it: ZsetIterator, key: &[u8]) -> Option<u64> {
    let mut rank = 0u64;
    for (k, _) in it {
        if k == key {
            return Some(rank);
        }
        rank += 1;
    }
    None
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
    fn test_zset_insert_update_noop() {
        let s = store();
        assert_eq!(
            s.zset(b"z", b"alice", 100, LogType::Sync).unwrap(),
            Insertion::Inserted
        );
        assert_eq!(
            s.zset(b"z", b"alice", 50, LogType::Sync).unwrap(),
            Insertion::Updated
        );
        let seq = s.binlog().last_seq();
        // equal score writes nothing
        assert_eq!(
            s.zset(b"z", b"alice", 50, LogType::Sync).unwrap(),
            Insertion::Updated
        );
        assert_eq!(s.binlog().last_seq(), seq);
        assert_eq!(s.zget(b"z", b"alice").unwrap(), Some(50));
        assert_eq!(s.zsize(b"z").unwrap(), 1);
    }

    #[test]
    fn test_zscore_pair_invariant_on_update() {
        let s = store();
        s.zset(b"z", b"k", 10, LogType::Sync).unwrap();
        s.zset(b"z", b"k", 20, LogType::Sync).unwrap();
        // the old by-score entry is gone, the new one exists
        assert_eq!(
            s.raw_get(&encode_zscore_key(b"z", b"k", 10)).unwrap(),
            None
        );
        assert!(s
            .raw_get(&encode_zscore_key(b"z", b"k", 20))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_zdel_cleans_both_entries_and_size() {
        let s = store();
        s.zset(b"z", b"k", 10, LogType::Sync).unwrap();
        assert!(s.zdel(b"z", b"k", LogType::Sync).unwrap());
        assert!(!s.zdel(b"z", b"k", LogType::Sync).unwrap());
        assert_eq!(s.raw_get(&encode_zset_key(b"z", b"k")).unwrap(), None);
        assert_eq!(
            s.raw_get(&encode_zscore_key(b"z", b"k", 10)).unwrap(),
            None
        );
        assert_eq!(s.raw_get(&encode_zsize_key(b"z")).unwrap(), None);
    }

    #[test]
    fn test_score_ordering_with_negatives() {
        let s = store();
        s.zset(b"z", b"alice", 100, LogType::Sync).unwrap();
        s.zset(b"z", b"bob", -5, LogType::Sync).unwrap();
        s.zset(b"z", b"carol", 50, LogType::Sync).unwrap();
        let got: Vec<(Vec<u8>, i64)> = s.zrange(b"z", 0, 100).collect();
        assert_eq!(
            got,
            vec![
                (b"bob".to_vec(), -5),
                (b"carol".to_vec(), 50),
                (b"alice".to_vec(), 100),
            ]
        );
        let rev: Vec<Vec<u8>> = s.zrrange(b"z", 0, 100).map(|(k, _)| k).collect();
        assert_eq!(rev, vec![b"alice".to_vec(), b"carol".to_vec(), b"bob".to_vec()]);
    }

    #[test]
    fn test_zrank() {
        let s = store();
        s.zset(b"z", b"alice", 100, LogType::Sync).unwrap();
        s.zset(b"z", b"bob", -5, LogType::Sync).unwrap();
        s.zset(b"z", b"carol", 50, LogType::Sync).unwrap();
        assert_eq!(s.zrank(b"z", b"carol").unwrap(), Some(1));
        assert_eq!(s.zrank(b"z", b"bob").unwrap(), Some(0));
        assert_eq!(s.zrrank(b"z", b"alice").unwrap(), Some(0));
        assert_eq!(s.zrank(b"z", b"nobody").unwrap(), None);
    }

    #[test]
    fn test_zrange_offset_limit() {
        let s = store();
        for (k, sc) in [(&b"a"[..], 1i64), (b"b", 2), (b"c", 3), (b"d", 4)] {
            s.zset(b"z", k, sc, LogType::Sync).unwrap();
        }
        let got: Vec<Vec<u8>> = s.zrange(b"z", 1, 2).map(|(k, _)| k).collect();
        assert_eq!(got, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_zincr() {
        let s = store();
        assert_eq!(s.zincr(b"z", b"k", 5, LogType::Sync).unwrap(), 5);
        assert_eq!(s.zincr(b"z", b"k", -8, LogType::Sync).unwrap(), -3);
        assert_eq!(s.zget(b"z", b"k").unwrap(), Some(-3));
        assert_eq!(s.zsize(b"z").unwrap(), 1);
    }

    #[test]
    fn test_zscan_window() {
        let s = store();
        for (k, sc) in [(&b"a"[..], 10i64), (b"b", 20), (b"c", 30)] {
            s.zset(b"z", k, sc, LogType::Sync).unwrap();
        }
        let got: Vec<(Vec<u8>, i64)> = s
            .zscan(b"z", b"", Some(15), Some(25), 100)
            .unwrap()
            .collect();
        assert_eq!(got, vec![(b"b".to_vec(), 20)]);
        // resume after a known key
        let got: Vec<Vec<u8>> = s
            .zscan(b"z", b"a", None, None, 100)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(got, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_zrscan() {
        let s = store();
        for (k, sc) in [(&b"a"[..], 10i64), (b"b", 20), (b"c", 30)] {
            s.zset(b"z", k, sc, LogType::Sync).unwrap();
        }
        let got: Vec<Vec<u8>> = s
            .zrscan(b"z", b"", None, None, 100)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(got, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_zlist_and_zclear() {
        let s = store();
        s.zset(b"za", b"k", 1, LogType::Sync).unwrap();
        s.zset(b"zb", b"k", 1, LogType::Sync).unwrap();
        assert_eq!(
            s.zlist(b"", b"", 100).unwrap(),
            vec![b"za".to_vec(), b"zb".to_vec()]
        );
        assert_eq!(s.zclear(b"za", LogType::Sync).unwrap(), 1);
        assert_eq!(s.zlist(b"", b"", 100).unwrap(), vec![b"zb".to_vec()]);
    }

    #[test]
    fn test_zset_name_isolation() {
        let s = store();
        s.zset(b"z1", b"k", 1, LogType::Sync).unwrap();
        s.zset(b"z2", b"k", 2, LogType::Sync).unwrap();
        let got: Vec<(Vec<u8>, i64)> = s.zrange(b"z1", 0, 100).collect();
        assert_eq!(got, vec![(b"k".to_vec(), 1)]);
    }
}
