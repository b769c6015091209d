//! kitedb: a network-accessible typed key-value store.
//!
//! Four data models (strings, hashes, sorted sets, queues) over an
//! ordered engine, an atomic binlog write path, primary/replica and
//! mirrored replication, a range-sharded cluster table and a bulk dump
//! facility. This crate wires the workspace members into a server; the
//! pieces live in `kite-core`, `kite-engine`, `kite-store`, `kite-net`,
//! `kite-repl` and `kite-cluster`.

pub mod config;
pub mod procs;
pub mod serv;

pub use config::Config;
pub use serv::DbServer;

/// Server version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
