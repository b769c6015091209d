//! Typed iterators over engine scans.
//!
//! Each wrapper decodes engine keys and stops as soon as the scan leaves
//! its type tag (or, for hashes, its collection). Entries that fail to
//! decode are skipped.

use kite_core::codec::{decode_hash_key, decode_kv_key, decode_zscore_key};
use kite_core::consts::tag;
use kite_engine::EngineIter;

/// Iterates `(key, value)` pairs of the plain KV space.
pub struct KvIterator {
    inner: EngineIter,
    return_values: bool,
    done: bool,
}

impl KvIterator {
    pub(crate) fn new(inner: EngineIter, return_values: bool) -> KvIterator {
        KvIterator {
            inner,
            return_values,
            done: false,
        }
    }
}

impl Iterator for KvIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for (k, v) in self.inner.by_ref() {
            if k.first() != Some(&tag::KV) {
                self.done = true;
                return None;
            }
            match decode_kv_key(&k) {
                Ok(key) => {
                    let value = if self.return_values { v } else { Vec::new() };
                    return Some((key, value));
                }
                Err(_) => continue,
            }
        }
        self.done = true;
        None
    }
}

/// Iterates `(field, value)` pairs of one hash.
pub struct HashIterator {
    inner: EngineIter,
    name: Vec<u8>,
    return_values: bool,
    done: bool,
}

impl HashIterator {
    pub(crate) fn new(inner: EngineIter, name: &[u8], return_values: bool) -> HashIterator {
        HashIterator {
            inner,
            name: name.to_vec(),
            return_values,
            done: false,
        }
    }
}

impl Iterator for HashIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for (k, v) in self.inner.by_ref() {
            if k.first() != Some(&tag::HASH) {
                self.done = true;
                return None;
            }
            match decode_hash_key(&k) {
                Ok((name, field)) => {
                    if name != self.name {
                        self.done = true;
                        return None;
                    }
                    let value = if self.return_values { v } else { Vec::new() };
                    return Some((field, value));
                }
                Err(_) => continue,
            }
        }
        self.done = true;
        None
    }
}

/// Iterates `(key, score)` pairs of one sorted set in score order.
pub struct ZsetIterator {
    inner: EngineIter,
    done: bool,
}

impl ZsetIterator {
    pub(crate) fn new(inner: EngineIter) -> ZsetIterator {
        ZsetIterator { inner, done: false }
    }

    /// Advance past `n` entries; false when the iterator ran dry first.
    pub fn skip_n(&mut self, mut n: u64) -> bool {
        while n > 0 {
            if self.next().is_none() {
                return false;
            }
            n -= 1;
        }
        true
    }
}

impl Iterator for ZsetIterator {
    type Item = (Vec<u8>, i64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        for (k, _) in self.inner.by_ref() {
            if k.first() != Some(&tag::ZSCORE) {
                self.done = true;
                return None;
            }
            match decode_zscore_key(&k) {
                Ok((_, key, score)) => return Some((key, score)),
                Err(_) => continue,
            }
        }
        self.done = true;
        None
    }
}
