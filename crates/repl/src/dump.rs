//! One-shot bulk dump of the keyspace to a client connection.

use std::time::Duration;

use tracing::{info, warn};

use kite_core::strings::parse_u64;
use kite_net::{Link, Request};
use kite_store::Store;

/// Flush to the socket whenever this much output is buffered.
const FLUSH_THRESHOLD: usize = 32 * 1024;

/// Streams `dump [start [end [limit]]]` responses on dedicated threads.
pub struct BackendDump {
    store: Store,
}

impl BackendDump {
    /// Create the dump backend for `store`.
    pub fn new(store: Store) -> BackendDump {
        BackendDump { store }
    }

    /// Take over a link that sent `dump`; spawns the worker thread.
    pub fn proc(&self, link: Link, req: &Request) {
        info!(remote = %link.remote_addr, "accept dump client");
        let store = self.store.clone();
        let req = req.clone();
        let spawned = std::thread::Builder::new()
            .name("kite-dump".to_string())
            .spawn(move || run_dump(store, link, &req));
        if let Err(e) = spawned {
            warn!("cannot spawn dump thread: {}", e);
        }
    }
}

fn run_dump(store: Store, mut link: Link, req: &Request) {
    if link.set_nonblocking(false).is_err() {
        return;
    }

    let start = match req.rec(1) {
        Some(s) if !s.is_empty() => s.to_vec(),
        _ => b"A".to_vec(),
    };
    let end = req.rec(2).map(<[u8]>::to_vec).unwrap_or_default();
    let limit = req.rec(3).and_then(parse_u64).unwrap_or(10);
    info!(
        start = %String::from_utf8_lossy(&start),
        end = %String::from_utf8_lossy(&end),
        limit,
        "dump begin"
    );

    let mut count: u64 = 0;
    link.send(&[b"begin"]);
    for (key, value) in store.dump_range(&start, &end, limit) {
        count += 1;
        link.send(&[b"set", &key, &value]);
        if link.output.len() >= FLUSH_THRESHOLD && link.flush().is_err() {
            warn!(remote = %link.remote_addr, "dump send error");
            return;
        }
    }
    link.send(&[b"end", count.to_string().as_bytes()]);
    if link.flush().is_err() {
        warn!(remote = %link.remote_addr, "dump send error");
        return;
    }

    // wait for the client to close first so it never sees a reset
    let _ = link.set_read_timeout(Some(Duration::from_secs(30)));
    let _ = link.read();
    info!(remote = %link.remote_addr, count, "dump finished");
}
