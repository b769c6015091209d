//! Replication and bulk dump.
//!
//! [`BackendSync`] runs on the primary: one worker thread per connected
//! replica, each driving the COPY → SYNC → OUT_OF_SYNC state machine over
//! the binlog. [`Slave`] runs on a replica: it connects out, consumes the
//! record stream and re-executes mutations locally. [`BackendDump`]
//! streams a one-shot snapshot of the keyspace to a client.

pub mod dump;
pub mod slave;
pub mod sync;

pub use dump::BackendDump;
pub use slave::{Slave, SlaveProgress, SlaveStatus};
pub use sync::{BackendSync, ClientStats};

/// Control tag sent alongside a COPY/BEGIN marker.
pub const COPY_BEGIN_TAG: &[u8] = b"copy_begin";
/// Control tag sent alongside a COPY/END marker.
pub const COPY_END_TAG: &[u8] = b"copy_end";
