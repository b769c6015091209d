//! Hash (name → field → value) operations.
//!
//! Alongside each field entry the store keeps one size counter per hash;
//! the counter moves only on true insert or delete and is removed when it
//! reaches zero, so an empty hash leaves no metadata behind.

use kite_core::codec::{decode_hsize_key, encode_hash_key, encode_hsize_key};
use kite_core::consts::tag;
use kite_core::limits::{check_key, check_name};
use kite_core::strings::parse_i64;
use kite_core::{Error, LogCommand, LogType, Result};

use crate::iterator::HashIterator;
use crate::store::{decode_size, encode_size, Store};
use crate::{Insertion, Transaction};

impl Store {
    /// Read one field.
    pub fn hget(&self, name: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.raw_get(&encode_hash_key(name, key))
    }

    /// Set one field. Returns whether a new field was inserted.
    pub fn hset(
        &self,
        name: &[u8],
        key: &[u8],
        value: &[u8],
        log_type: LogType,
    ) -> Result<Insertion> {
        let mut tx = self.binlog().transaction();
        let ret = self.hset_one(&mut tx, name, key, value, log_type)?;
        if ret == Insertion::Inserted {
            self.incr_hsize(&mut tx, name, 1)?;
        }
        tx.commit()?;
        Ok(ret)
    }

    /// Delete one field. Returns whether it existed.
    pub fn hdel(&self, name: &[u8], key: &[u8], log_type: LogType) -> Result<bool> {
        let mut tx = self.binlog().transaction();
        let existed = self.hdel_one(&mut tx, name, key, log_type)?;
        if existed {
            self.incr_hsize(&mut tx, name, -1)?;
        }
        tx.commit()?;
        Ok(existed)
    }

    /// Add `by` to the integer stored in one field.
    ///
    /// A field that does not parse as a decimal integer is left untouched
    /// and the call reports `None` instead of applying.
    pub fn hincr(&self, name: &[u8], key: &[u8], by: i64, log_type: LogType) -> Result<Option<i64>> {
        let mut tx = self.binlog().transaction();
        let new_val = match self.hget(name, key)? {
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
        let ret = self.hset_one(&mut tx, name, key, new_val.to_string().as_bytes(), log_type)?;
        if ret == Insertion::Inserted {
            self.incr_hsize(&mut tx, name, 1)?;
        }
        tx.commit()?;
        Ok(Some(new_val))
    }

    /// Number of fields in the hash. Missing or malformed counters read 0.
    pub fn hsize(&self, name: &[u8]) -> Result<i64> {
        match self.raw_get(&encode_hsize_key(name))? {
            None => Ok(0),
            Some(v) => Ok(decode_size(&v).unwrap_or(0).max(0)),
        }
    }

    /// Delete every field, in rounds of 1000. Returns fields removed.
    pub fn hclear(&self, name: &[u8], log_type: LogType) -> Result<u64> {
        let mut count = 0u64;
        loop {
            let fields: Vec<Vec<u8>> = self
                .hscan(name, b"", b"", 1000)
                .map(|(field, _)| field)
                .collect();
            if fields.is_empty() {
                return Ok(count);
            }
            for field in fields {
                self.hdel(name, &field, log_type)?;
                count += 1;
            }
        }
    }

    /// Scan fields in `(start, end]`, ascending.
    pub fn hscan(&self, name: &[u8], start: &[u8], end: &[u8], limit: u64) -> HashIterator {
        let key_start = encode_hash_key(name, start);
        let key_end = if end.is_empty() {
            Vec::new()
        } else {
            encode_hash_key(name, end)
        };
        HashIterator::new(self.fwd_range(&key_start, &key_end, limit), name, true)
    }

    /// Scan field names only, ascending.
    pub fn hkeys(&self, name: &[u8], start: &[u8], end: &[u8], limit: u64) -> HashIterator {
        let key_start = encode_hash_key(name, start);
        let key_end = if end.is_empty() {
            Vec::new()
        } else {
            encode_hash_key(name, end)
        };
        HashIterator::new(self.fwd_range(&key_start, &key_end, limit), name, false)
    }

    /// Scan fields descending from `start`.
    pub fn hrscan(&self, name: &[u8], start: &[u8], end: &[u8], limit: u64) -> HashIterator {
        let mut key_start = encode_hash_key(name, start);
        if start.is_empty() {
            key_start.push(0xff);
        }
        let key_end = if end.is_empty() {
            Vec::new()
        } else {
            encode_hash_key(name, end)
        };
        HashIterator::new(self.rev_range(&key_start, &key_end, limit), name, true)
    }

    /// List hash names in `(name_start, name_end]`.
    pub fn hlist(&self, name_start: &[u8], name_end: &[u8], limit: u64) -> Result<Vec<Vec<u8>>> {
        let start = encode_hsize_key(name_start);
        let end = if name_end.is_empty() {
            Vec::new()
        } else {
            encode_hsize_key(name_end)
        };
        Ok(collect_names(
            self.fwd_range(&start, &end, limit),
            tag::HSIZE,
            decode_hsize_key,
        ))
    }

    /// List hash names descending.
    pub fn hrlist(&self, name_start: &[u8], name_end: &[u8], limit: u64) -> Result<Vec<Vec<u8>>> {
        let mut start = encode_hsize_key(name_start);
        if name_start.is_empty() {
            start.push(0xff);
        }
        let end = if name_end.is_empty() {
            Vec::new()
        } else {
            encode_hsize_key(name_end)
        };
        Ok(collect_names(
            self.rev_range(&start, &end, limit),
            tag::HSIZE,
            decode_hsize_key,
        ))
    }

    fn hset_one(
        &self,
        tx: &mut Transaction<'_>,
        name: &[u8],
        key: &[u8],
        value: &[u8],
        log_type: LogType,
    ) -> Result<Insertion> {
        if !check_name(name) {
            return Err(Error::invalid_input("empty or oversized hash name"));
        }
        if !check_key(key) {
            return Err(Error::invalid_input("empty or oversized hash key"));
        }
        match self.hget(name, key)? {
            None => {
                let ekey = encode_hash_key(name, key);
                tx.put(ekey.clone(), value.to_vec());
                tx.add_log(log_type, LogCommand::HSet, &ekey);
                Ok(Insertion::Inserted)
            }
            Some(old) => {
                if old != value {
                    let ekey = encode_hash_key(name, key);
                    tx.put(ekey.clone(), value.to_vec());
                    tx.add_log(log_type, LogCommand::HSet, &ekey);
                }
                Ok(Insertion::Updated)
            }
        }
    }

    fn hdel_one(
        &self,
        tx: &mut Transaction<'_>,
        name: &[u8],
        key: &[u8],
        log_type: LogType,
    ) -> Result<bool> {
        if !check_name(name) || !check_key(key) {
            return Err(Error::invalid_input("empty or oversized hash name/key"));
        }
        if self.hget(name, key)?.is_none() {
            return Ok(false);
        }
        let ekey = encode_hash_key(name, key);
        tx.delete(ekey.clone());
        tx.add_log(log_type, LogCommand::HDel, &ekey);
        Ok(true)
    }

    fn incr_hsize(&self, tx: &mut Transaction<'_>, name: &[u8], delta: i64) -> Result<()> {
        let size = self.hsize(name)? + delta;
        let size_key = encode_hsize_key(name);
        if size <= 0 {
            tx.delete(size_key);
        } else {
            tx.put(size_key, encode_size(size));
        }
        Ok(())
    }
}

/// Decode consecutive size-counter keys of one tag into collection names.
pub(crate) fn collect_names(
    iter: kite_engine::EngineIter,
    size_tag: u8,
    decode: fn(&[u8]) -> Result<Vec<u8>>,
) -> Vec<Vec<u8>> {
    let mut names = Vec::new();
    for (k, _) in iter {
        if k.first() != Some(&size_tag) {
            break;
        }
        if let Ok(name) = decode(&k) {
            names.push(name);
        }
    }
    names
}
