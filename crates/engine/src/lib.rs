//! Ordered key-value engine boundary.
//!
//! kitedb layers typed encodings and a binlog on top of an embedded
//! ordered engine. The engine contract is small: point reads, atomic
//! batched writes, and range iterators that observe only keys committed
//! before their creation. Anything satisfying [`Engine`] can back a store;
//! [`MemEngine`] is the bundled reference implementation.

pub mod batch;
pub mod memory;
pub mod traits;

pub use batch::{BatchOp, WriteBatch};
pub use memory::MemEngine;
pub use traits::{Direction, Engine, EngineIter, IterOptions};
