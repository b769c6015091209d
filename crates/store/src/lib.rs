//! Typed storage over an ordered engine.
//!
//! [`Store`] layers four data models (plain KV, hashes, sorted sets and
//! queues) on one [`kite_engine::Engine`], and couples every mutation with
//! a binlog record through [`BinlogQueue`] so replication can replay the
//! exact commit order.
//!
//! All mutators run inside a [`Transaction`], which holds the binlog
//! queue's mutex for its whole scope. That single lock makes binlog
//! sequence numbers a total order equal to commit order. Reads go straight
//! to the engine and never take the lock.

mod binlog;
mod hash;
mod iterator;
mod kv;
mod queue;
mod store;
mod zset;

pub use binlog::{Binlog, BinlogQueue, Transaction};
pub use iterator::{HashIterator, KvIterator, ZsetIterator};
pub use store::Store;

/// Outcome of a set-type mutation on a keyed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// The member did not exist before; the size counter moved.
    Inserted,
    /// The member already existed (value may or may not have changed).
    Updated,
}

impl Insertion {
    /// 1 for an insert, 0 for an update, the wire convention.
    pub fn as_i64(self) -> i64 {
        match self {
            Insertion::Inserted => 1,
            Insertion::Updated => 0,
        }
    }
}
