//! Queue (name → deque of items) operations.
//!
//! Items live under per-name sequences in `[QITEM_MIN_SEQ, QITEM_MAX_SEQ]`.
//! Two reserved sequences store the current head and tail item sequence;
//! the first push lands both pointers in the middle of the window so the
//! queue grows symmetrically in either direction. The live sequences of a
//! queue always form the contiguous range `[front, back]`.

use kite_core::codec::{decode_qitem_key, decode_qsize_key, encode_qitem_key, encode_qsize_key};
use kite_core::consts::tag;
use kite_core::limits::{QBACK_SEQ, QFRONT_SEQ, QITEM_MAX_SEQ, QITEM_MIN_SEQ, QITEM_SEQ_INIT};
use kite_core::{Error, LogCommand, LogType, Result};
use kite_engine::traits::NO_LIMIT;

use crate::hash::collect_names;
use crate::store::{decode_seq, decode_size, encode_seq, encode_size, Store};
use crate::Transaction;

impl Store {
    /// Number of items. A missing counter reads 0.
    pub fn qsize(&self, name: &[u8]) -> Result<i64> {
        match self.raw_get(&encode_qsize_key(name))? {
            None => Ok(0),
            Some(v) => decode_size(&v).ok_or_else(|| Error::corruption("malformed queue size")),
        }
    }

    /// Peek the head item.
    pub fn qfront(&self, name: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.qget_pointer(name, QFRONT_SEQ)? {
            None => Ok(None),
            Some(seq) => self.qget_by_seq(name, seq),
        }
    }

    /// Peek the tail item.
    pub fn qback(&self, name: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.qget_pointer(name, QBACK_SEQ)? {
            None => Ok(None),
            Some(seq) => self.qget_by_seq(name, seq),
        }
    }

    /// Push at the head. Returns the new size.
    pub fn qpush_front(&self, name: &[u8], item: &[u8], log_type: LogType) -> Result<i64> {
        self.qpush(name, item, QFRONT_SEQ, log_type)
    }

    /// Push at the tail. Returns the new size.
    pub fn qpush_back(&self, name: &[u8], item: &[u8], log_type: LogType) -> Result<i64> {
        self.qpush(name, item, QBACK_SEQ, log_type)
    }

    /// Pop at the head.
    pub fn qpop_front(&self, name: &[u8], log_type: LogType) -> Result<Option<Vec<u8>>> {
        self.qpop(name, QFRONT_SEQ, log_type)
    }

    /// Pop at the tail.
    pub fn qpop_back(&self, name: &[u8], log_type: LogType) -> Result<Option<Vec<u8>>> {
        self.qpop(name, QBACK_SEQ, log_type)
    }

    /// Read the item at `index`; negative indexes count from the tail.
    pub fn qget(&self, name: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        match self.qseq_of_index(name, index)? {
            None => Ok(None),
            Some(seq) => self.qget_by_seq(name, seq),
        }
    }

    /// Overwrite the item at `index`. Returns false when out of range.
    pub fn qset(&self, name: &[u8], index: i64, item: &[u8], log_type: LogType) -> Result<bool> {
        let mut tx = self.binlog().transaction();
        let size = self.qsize(name)?;
        if index >= size || index < -size {
            return Ok(false);
        }
        let seq = match self.qseq_of_index(name, index)? {
            None => return Ok(false),
            Some(seq) => seq,
        };
        let ekey = encode_qitem_key(name, seq);
        tx.put(ekey.clone(), item.to_vec());
        tx.add_log(log_type, LogCommand::QSet, &ekey);
        tx.commit()?;
        Ok(true)
    }

    /// Overwrite the item at an absolute sequence, replication's addressing.
    pub fn qset_by_seq(
        &self,
        name: &[u8],
        seq: u64,
        item: &[u8],
        log_type: LogType,
    ) -> Result<bool> {
        let mut tx = self.binlog().transaction();
        let size = self.qsize(name)?;
        let min_seq = self.qget_pointer(name, QFRONT_SEQ)?.unwrap_or(0);
        let max_seq = min_seq + size as u64;
        if seq < min_seq || seq > max_seq {
            return Ok(false);
        }
        let ekey = encode_qitem_key(name, seq);
        tx.put(ekey.clone(), item.to_vec());
        tx.add_log(log_type, LogCommand::QSet, &ekey);
        tx.commit()?;
        Ok(true)
    }

    /// Items between two indexes, inclusive; negative indexes count from
    /// the tail.
    pub fn qslice(&self, name: &[u8], begin: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        let (seq_begin, seq_end) = match (begin >= 0, end >= 0) {
            (true, true) => {
                let front = match self.qget_pointer(name, QFRONT_SEQ)? {
                    None => return Ok(Vec::new()),
                    Some(s) => s,
                };
                (front + begin as u64, front + end as u64)
            }
            (false, false) => {
                let back = match self.qget_pointer(name, QBACK_SEQ)? {
                    None => return Ok(Vec::new()),
                    Some(s) => s,
                };
                (
                    back.wrapping_add((begin + 1) as u64),
                    back.wrapping_add((end + 1) as u64),
                )
            }
            _ => {
                let front = match self.qget_pointer(name, QFRONT_SEQ)? {
                    None => return Ok(Vec::new()),
                    Some(s) => s,
                };
                let back = match self.qget_pointer(name, QBACK_SEQ)? {
                    None => return Ok(Vec::new()),
                    Some(s) => s,
                };
                let b = if begin >= 0 {
                    front + begin as u64
                } else {
                    back.wrapping_add((begin + 1) as u64)
                };
                let e = if end >= 0 {
                    front + end as u64
                } else {
                    back.wrapping_add((end + 1) as u64)
                };
                (b, e)
            }
        };
        let mut items = Vec::new();
        let mut seq = seq_begin;
        while seq <= seq_end {
            match self.qget_by_seq(name, seq)? {
                None => break,
                Some(item) => items.push(item),
            }
            seq += 1;
        }
        Ok(items)
    }

    /// List queue names ascending.
    pub fn qlist(&self, name_start: &[u8], name_end: &[u8], limit: u64) -> Result<Vec<Vec<u8>>> {
        let start = encode_qsize_key(name_start);
        let end = if name_end.is_empty() {
            Vec::new()
        } else {
            encode_qsize_key(name_end)
        };
        Ok(collect_names(
            self.fwd_range(&start, &end, limit),
            tag::QSIZE,
            decode_qsize_key,
        ))
    }

    /// List queue names descending.
    pub fn qrlist(&self, name_start: &[u8], name_end: &[u8], limit: u64) -> Result<Vec<Vec<u8>>> {
        let mut start = encode_qsize_key(name_start);
        if name_start.is_empty() {
            start.push(0xff);
        }
        let end = if name_end.is_empty() {
            Vec::new()
        } else {
            encode_qsize_key(name_end)
        };
        Ok(collect_names(
            self.rev_range(&start, &end, limit),
            tag::QSIZE,
            decode_qsize_key,
        ))
    }

    /// Pop everything. Returns items removed.
    pub fn qclear(&self, name: &[u8], log_type: LogType) -> Result<u64> {
        let mut count = 0u64;
        while self.qpop_front(name, log_type)?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Rebuild size, front and back from the items actually present.
    pub fn qfix(&self, name: &[u8]) -> Result<()> {
        let mut tx = self.binlog().transaction();
        let key_start = encode_qitem_key(name, QITEM_MIN_SEQ - 1);
        let key_end = encode_qitem_key(name, QITEM_MAX_SEQ);

        let mut seq_min: Option<u64> = None;
        let mut seq_max = 0u64;
        let mut count = 0i64;
        for (k, _) in self.fwd_range(&key_start, &key_end, NO_LIMIT) {
            let (_, seq) = decode_qitem_key(&k)?;
            if seq_min.is_none() {
                seq_min = Some(seq);
            }
            seq_max = seq;
            count += 1;
        }

        match seq_min {
            None => {
                tx.delete(encode_qsize_key(name));
                tx.delete(encode_qitem_key(name, QFRONT_SEQ));
                tx.delete(encode_qitem_key(name, QBACK_SEQ));
            }
            Some(min) => {
                tx.put(encode_qsize_key(name), encode_size(count));
                tx.put(encode_qitem_key(name, QFRONT_SEQ), encode_seq(min));
                tx.put(encode_qitem_key(name, QBACK_SEQ), encode_seq(seq_max));
            }
        }
        tx.commit()
    }

    fn qget_by_seq(&self, name: &[u8], seq: u64) -> Result<Option<Vec<u8>>> {
        self.raw_get(&encode_qitem_key(name, seq))
    }

    fn qget_pointer(&self, name: &[u8], meta_seq: u64) -> Result<Option<u64>> {
        match self.qget_by_seq(name, meta_seq)? {
            None => Ok(None),
            Some(v) => decode_seq(&v)
                .map(Some)
                .ok_or_else(|| Error::corruption("malformed queue pointer")),
        }
    }

    fn qseq_of_index(&self, name: &[u8], index: i64) -> Result<Option<u64>> {
        let pointer = if index >= 0 { QFRONT_SEQ } else { QBACK_SEQ };
        match self.qget_pointer(name, pointer)? {
            None => Ok(None),
            Some(base) => {
                let seq = if index >= 0 {
                    base.wrapping_add(index as u64)
                } else {
                    base.wrapping_add((index + 1) as u64)
                };
                Ok(Some(seq))
            }
        }
    }

    fn qpush(&self, name: &[u8], item: &[u8], meta_seq: u64, log_type: LogType) -> Result<i64> {
        let mut tx = self.binlog().transaction();
        let seq = match self.qget_pointer(name, meta_seq)? {
            None => {
                // empty queue: land in the middle so both ends have room
                let seq = QITEM_SEQ_INIT;
                tx.put(encode_qitem_key(name, QFRONT_SEQ), encode_seq(seq));
                tx.put(encode_qitem_key(name, QBACK_SEQ), encode_seq(seq));
                seq
            }
            Some(cur) => {
                let seq = if meta_seq == QFRONT_SEQ {
                    cur.wrapping_sub(1)
                } else {
                    cur.wrapping_add(1)
                };
                tx.put(encode_qitem_key(name, meta_seq), encode_seq(seq));
                seq
            }
        };
        if seq <= QITEM_MIN_SEQ || seq >= QITEM_MAX_SEQ {
            return Err(Error::QueueFull { seq });
        }

        let ekey = encode_qitem_key(name, seq);
        tx.put(ekey.clone(), item.to_vec());
        let cmd = if meta_seq == QFRONT_SEQ {
            LogCommand::QPushFront
        } else {
            LogCommand::QPushBack
        };
        tx.add_log(log_type, cmd, &ekey);

        let size = self.incr_qsize(&mut tx, name, 1)?;
        tx.commit()?;
        Ok(size)
    }

    fn qpop(&self, name: &[u8], meta_seq: u64, log_type: LogType) -> Result<Option<Vec<u8>>> {
        let mut tx = self.binlog().transaction();
        let seq = match self.qget_pointer(name, meta_seq)? {
            None => return Ok(None),
            Some(s) => s,
        };
        let item = match self.qget_by_seq(name, seq)? {
            None => return Ok(None),
            Some(i) => i,
        };

        tx.delete(encode_qitem_key(name, seq));
        // pops log the bare queue name; there is no surviving item key
        let cmd = if meta_seq == QFRONT_SEQ {
            LogCommand::QPopFront
        } else {
            LogCommand::QPopBack
        };
        tx.add_log(log_type, cmd, name);

        let size = self.incr_qsize(&mut tx, name, -1)?;
        if size > 0 {
            let next = if meta_seq == QFRONT_SEQ {
                seq.wrapping_add(1)
            } else {
                seq.wrapping_sub(1)
            };
            tx.put(encode_qitem_key(name, meta_seq), encode_seq(next));
        }
        tx.commit()?;
        Ok(Some(item))
    }

    fn incr_qsize(&self, tx: &mut Transaction<'_>, name: &[u8], delta: i64) -> Result<i64> {
        let size = self.qsize(name)? + delta;
        if size <= 0 {
            tx.delete(encode_qsize_key(name));
            tx.delete(encode_qitem_key(name, QFRONT_SEQ));
            tx.delete(encode_qitem_key(name, QBACK_SEQ));
        } else {
            tx.put(encode_qsize_key(name), encode_size(size));
        }
        Ok(size)
    }
}
