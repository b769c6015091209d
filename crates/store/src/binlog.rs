//! Binlog records, the bounded binlog queue, and transactions.
//!
//! The queue stores mutation records in the same engine as user data,
//! under the reserved binlog tag. A [`Transaction`] bundles
//! data mutations with their binlog records into one atomic engine batch;
//! a background thread trims records once the retained window exceeds the
//! configured capacity.

use std::mem;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use kite_core::codec::{decode_binlog_key, encode_binlog_key};
use kite_core::{Error, LogCommand, LogType, Result};
use kite_engine::{Engine, IterOptions, WriteBatch};

/// Fixed part of a serialized record: be64 seq + type byte + cmd byte.
const HEADER_LEN: usize = 10;

/// One mutation record: `(seq, type, cmd, key)`.
///
/// The key field carries the encoded engine key of the mutated entry (or
/// the bare queue name for pops), so a replica can re-derive user-level
/// names through the same codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binlog {
    seq: u64,
    log_type: LogType,
    cmd: LogCommand,
    key: Vec<u8>,
}

impl Binlog {
    /// Create a record.
    pub fn new(seq: u64, log_type: LogType, cmd: LogCommand, key: &[u8]) -> Binlog {
        Binlog {
            seq,
            log_type,
            cmd,
            key: key.to_vec(),
        }
    }

    /// Sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Replication class.
    pub fn log_type(&self) -> LogType {
        self.log_type
    }

    /// Recorded operation.
    pub fn cmd(&self) -> LogCommand {
        self.cmd
    }

    /// Encoded engine key of the mutated entry.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Serialize: be64 seq, type byte, cmd byte, raw key bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.key.len());
        let mut seq = [0u8; 8];
        BigEndian::write_u64(&mut seq, self.seq);
        buf.extend_from_slice(&seq);
        buf.push(self.log_type.as_u8());
        buf.push(self.cmd.as_u8());
        buf.extend_from_slice(&self.key);
        buf
    }

    /// Parse a serialized record.
    pub fn decode(buf: &[u8]) -> Result<Binlog> {
        if buf.len() < HEADER_LEN {
            return Err(Error::corruption("binlog record too short"));
        }
        let seq = BigEndian::read_u64(&buf[..8]);
        let log_type = LogType::from_u8(buf[8])
            .ok_or_else(|| Error::corruption(format!("unknown binlog type {}", buf[8])))?;
        let cmd = LogCommand::from_u8(buf[9])
            .ok_or_else(|| Error::corruption(format!("unknown binlog cmd {}", buf[9])))?;
        Ok(Binlog {
            seq,
            log_type,
            cmd,
            key: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Human-readable form for logs.
    pub fn dumps(&self) -> String {
        format!(
            "seq={} type={:?} cmd={:?} key={}",
            self.seq,
            self.log_type,
            self.cmd,
            String::from_utf8_lossy(&self.key)
        )
    }
}

struct QueueInner {
    last_seq: u64,
    tran_seq: u64,
    batch: WriteBatch,
}

/// Bounded circular log of mutation records.
///
/// A single mutex serializes all writers; [`Transaction`] acquires it for
/// its whole scope. Readers (`find_next`, `find_last`, `get`) read the
/// engine directly.
pub struct BinlogQueue {
    engine: Arc<dyn Engine>,
    enabled: bool,
    inner: Arc<Mutex<QueueInner>>,
    min_seq: Arc<AtomicU64>,
    quit: Arc<AtomicBool>,
    cleaner: Mutex<Option<JoinHandle<()>>>,
}

impl BinlogQueue {
    /// Open the queue over `engine` with the given retention capacity.
    ///
    /// When `enabled` is false, `add_log` becomes a no-op and no cleaner
    /// thread runs (used by the metadata store).
    pub fn open(engine: Arc<dyn Engine>, enabled: bool, capacity: u64) -> BinlogQueue {
        let (min_seq, last_seq) = Self::load_state(&engine);
        debug!(min_seq, last_seq, enabled, "binlog queue opened");
        let inner = Arc::new(Mutex::new(QueueInner {
            last_seq,
            tran_seq: last_seq,
            batch: WriteBatch::new(),
        }));
        let min_seq = Arc::new(AtomicU64::new(min_seq));
        let quit = Arc::new(AtomicBool::new(false));

        let cleaner = if enabled {
            let engine2 = Arc::clone(&engine);
            let inner2 = Arc::clone(&inner);
            let min2 = Arc::clone(&min_seq);
            let quit2 = Arc::clone(&quit);
            let handle = std::thread::Builder::new()
                .name("kite-binlog-clean".to_string())
                .spawn(move || clean_loop(engine2, inner2, min2, capacity, quit2))
                .expect("failed to spawn binlog cleaner thread");
            Some(handle)
        } else {
            None
        };

        BinlogQueue {
            engine,
            enabled,
            inner,
            min_seq,
            quit,
            cleaner: Mutex::new(cleaner),
        }
    }

    fn load_state(engine: &Arc<dyn Engine>) -> (u64, u64) {
        let last_seq = engine
            .iter(IterOptions::reverse(
                Bound::Included(encode_binlog_key(0)),
                Bound::Included(encode_binlog_key(u64::MAX)),
                1,
            ))
            .next()
            .and_then(|(k, _)| decode_binlog_key(&k).ok())
            .unwrap_or(0);
        let min_seq = engine
            .iter(IterOptions::forward(
                Bound::Included(encode_binlog_key(0)),
                Bound::Included(encode_binlog_key(u64::MAX)),
                1,
            ))
            .next()
            .and_then(|(k, _)| decode_binlog_key(&k).ok())
            .unwrap_or(last_seq + 1);
        (min_seq, last_seq)
    }

    /// Open a write scope. Blocks until every other writer has finished.
    ///
    /// Opening a transaction discards any uncommitted residue from an
    /// earlier scope on the same queue.
    pub fn transaction(&self) -> Transaction<'_> {
        let mut guard = self.inner.lock();
        guard.batch.clear();
        guard.tran_seq = guard.last_seq;
        Transaction { queue: self, guard }
    }

    /// `(min_seq, last_seq)` of the retained window.
    pub fn stats(&self) -> (u64, u64) {
        (self.min_seq.load(Ordering::SeqCst), self.inner.lock().last_seq)
    }

    /// Highest committed sequence.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().last_seq
    }

    /// Fetch the record stored at exactly `seq`.
    pub fn get(&self, seq: u64) -> Result<Option<Binlog>> {
        match self.engine.get(&encode_binlog_key(seq))? {
            Some(v) => Ok(Some(Binlog::decode(&v)?)),
            None => Ok(None),
        }
    }

    /// Lowest-sequenced record with `seq' >= seq`, if any.
    pub fn find_next(&self, seq: u64) -> Result<Option<Binlog>> {
        match self
            .engine
            .iter(IterOptions::forward(
                Bound::Included(encode_binlog_key(seq)),
                Bound::Included(encode_binlog_key(u64::MAX)),
                1,
            ))
            .next()
        {
            Some((_, v)) => Ok(Some(Binlog::decode(&v)?)),
            None => Ok(None),
        }
    }

    /// Highest-sequenced record, if any.
    pub fn find_last(&self) -> Result<Option<Binlog>> {
        match self
            .engine
            .iter(IterOptions::reverse(
                Bound::Included(encode_binlog_key(0)),
                Bound::Included(encode_binlog_key(u64::MAX)),
                1,
            ))
            .next()
        {
            Some((_, v)) => Ok(Some(Binlog::decode(&v)?)),
            None => Ok(None),
        }
    }

    /// Rewrite the record at `seq` in place.
    pub fn update(&self, seq: u64, log_type: LogType, cmd: LogCommand, key: &[u8]) -> Result<()> {
        let log = Binlog::new(seq, log_type, cmd, key);
        let mut batch = WriteBatch::new();
        batch.put(encode_binlog_key(seq), log.encode());
        self.engine.write(batch)
    }
}

impl Drop for BinlogQueue {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.cleaner.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Scoped write: binlog mutex + staged batch.
///
/// Dropping the scope rolls back anything not committed; calling
/// [`Transaction::commit`] and then dropping is safe.
pub struct Transaction<'a> {
    queue: &'a BinlogQueue,
    guard: MutexGuard<'a, QueueInner>,
}

impl<'a> Transaction<'a> {
    /// Stage an engine put.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.guard.batch.put(key, value);
    }

    /// Stage an engine delete.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.guard.batch.delete(key);
    }

    /// Stage a binlog record for the next sequence.
    pub fn add_log(&mut self, log_type: LogType, cmd: LogCommand, key: &[u8]) {
        if !self.queue.enabled {
            return;
        }
        self.guard.tran_seq += 1;
        let seq = self.guard.tran_seq;
        let log = Binlog::new(seq, log_type, cmd, key);
        self.guard.batch.put(encode_binlog_key(seq), log.encode());
    }

    /// Flush the staged batch to the engine as one atomic write.
    ///
    /// On success `last_seq` advances to the highest staged sequence. On
    /// engine failure the batch is discarded and `last_seq` is untouched.
    pub fn commit(&mut self) -> Result<()> {
        let batch = mem::take(&mut self.guard.batch);
        match self.queue.engine.write(batch) {
            Ok(()) => {
                self.guard.last_seq = self.guard.tran_seq;
                Ok(())
            }
            Err(e) => {
                self.guard.tran_seq = self.guard.last_seq;
                error!("binlog commit failed: {}", e);
                Err(e)
            }
        }
    }

    /// Discard the staged batch. Idempotent; implied by drop.
    pub fn rollback(&mut self) {
        self.guard.batch.clear();
        self.guard.tran_seq = self.guard.last_seq;
    }
}

impl<'a> Drop for Transaction<'a> {
    fn drop(&mut self) {
        self.rollback();
    }
}

fn clean_loop(
    engine: Arc<dyn Engine>,
    inner: Arc<Mutex<QueueInner>>,
    min_seq: Arc<AtomicU64>,
    capacity: u64,
    quit: Arc<AtomicBool>,
) {
    const CHUNK: u64 = 10_000;
    while !quit.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
        let last = inner.lock().last_seq;
        let min = min_seq.load(Ordering::SeqCst);
        if last < min || last - min + 1 <= capacity {
            continue;
        }
        // trim [min, last - capacity]
        let end = last - capacity;
        let mut seq = min;
        while seq <= end && !quit.load(Ordering::SeqCst) {
            let chunk_end = end.min(seq + CHUNK - 1);
            let mut batch = WriteBatch::new();
            for s in seq..=chunk_end {
                batch.delete(encode_binlog_key(s));
            }
            if let Err(e) = engine.write(batch) {
                warn!("binlog trim failed: {}", e);
                break;
            }
            seq = chunk_end + 1;
            min_seq.store(seq, Ordering::SeqCst);
        }
        debug!(
            min_seq = min_seq.load(Ordering::SeqCst),
            last_seq = last,
            "binlog trimmed"
        );
    }
}
