//! Primary-side replication: one worker per replica.
//!
//! A replica opens a connection and sends
//! `sync140 <last_seq> <last_key> <sync|mirror>`. The worker then loops:
//! `sync()` first, then `copy()`: `sync()` refreshes `last_seq` to the
//! newest record while a COPY is starting, so the copy never re-ships
//! values overwritten after the iterator was created. Idle workers emit a
//! NOOP heartbeat every few seconds; a trimmed binlog flips the state to
//! OUT_OF_SYNC, which resets to a fresh COPY.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use kite_core::consts::tag;
use kite_core::strings::parse_u64;
use kite_core::{LogCommand, LogType};
use kite_net::{Link, Request};
use kite_store::{Binlog, Store};

use crate::{COPY_BEGIN_TAG, COPY_END_TAG};

const TICK_INTERVAL: Duration = Duration::from_millis(300);
/// Idle ticks before a NOOP heartbeat (3 s).
const NOOP_IDLES: u32 = 10;
/// Mirror-skipped records between forced heartbeats.
const MIRROR_NOOP_GAP: u64 = 1000;
const COPY_BATCH_KEYS: u32 = 1000;
const COPY_BATCH_BYTES: usize = 2 * 1024 * 1024;
const COPY_BATCH_TIME: Duration = Duration::from_secs(3);
/// How long `Drop` waits for workers to observe the quit flag.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Snapshot of one replica worker, for `info`.
#[derive(Debug, Clone)]
pub struct ClientStats {
    /// Peer address.
    pub remote: String,
    /// `mirror` or `sync`.
    pub is_mirror: bool,
    /// Current state name.
    pub status: &'static str,
    /// Last shipped sequence.
    pub last_seq: u64,
}

/// Primary-side replication manager.
pub struct BackendSync {
    store: Store,
    /// Outbound throttle in MiB/s; 0 disables throttling.
    sync_speed: u64,
    quit: Arc<AtomicBool>,
    workers: Arc<Mutex<HashMap<u64, ClientStats>>>,
    next_id: AtomicU64,
}

impl BackendSync {
    /// Create the manager for `store`.
    pub fn new(store: Store, sync_speed: u64) -> BackendSync {
        BackendSync {
            store,
            sync_speed,
            quit: Arc::new(AtomicBool::new(false)),
            workers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stats for every connected replica.
    pub fn stats(&self) -> Vec<ClientStats> {
        self.workers.lock().values().cloned().collect()
    }

    /// Take over a link that sent `sync140`; spawns the worker thread.
    pub fn proc(&self, link: Link, req: &Request) {
        info!(remote = %link.remote_addr, "accept sync client");
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let store = self.store.clone();
        let quit = Arc::clone(&self.quit);
        let workers = Arc::clone(&self.workers);
        let sync_speed = self.sync_speed;
        let req = req.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("kite-sync-{}", id))
            .spawn(move || {
                run_client(id, store, link, &req, sync_speed, quit, workers);
            });
        if let Err(e) = spawned {
            warn!("cannot spawn sync worker: {}", e);
        }
    }
}

impl Drop for BackendSync {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            if self.workers.lock().is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                info!("sync workers did not exit in time");
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        debug!("backend sync finalized");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Init,
    OutOfSync,
    Copy,
    Sync,
}

impl Status {
    fn name(self) -> &'static str {
        match self {
            Status::Init => "INIT",
            Status::OutOfSync => "OUT_OF_SYNC",
            Status::Copy => "COPY",
            Status::Sync => "SYNC",
        }
    }
}

struct Client {
    store: Store,
    link: Link,
    status: Status,
    last_seq: u64,
    last_noop_seq: u64,
    last_key: Vec<u8>,
    is_mirror: bool,
    iter: Option<kite_engine::EngineIter>,
}

#[allow(clippy::too_many_arguments)]
fn run_client(
    id: u64,
    store: Store,
    mut link: Link,
    req: &Request,
    sync_speed: u64,
    quit: Arc<AtomicBool>,
    workers: Arc<Mutex<HashMap<u64, ClientStats>>>,
) {
    if link.set_nonblocking(false).is_err() {
        return;
    }
    let remote = link.remote_addr.to_string();

    let mut client = Client {
        store,
        link,
        status: Status::Init,
        last_seq: 0,
        last_noop_seq: 0,
        last_key: Vec::new(),
        is_mirror: false,
        iter: None,
    };
    client.init(req);

    let publish = |c: &Client| ClientStats {
        remote: remote.clone(),
        is_mirror: c.is_mirror,
        status: c.status.name(),
        last_seq: c.last_seq,
    };
    workers.lock().insert(id, publish(&client));

    let mut idle: u32 = 0;
    while !quit.load(Ordering::SeqCst) {
        if client.status == Status::OutOfSync {
            client.reset();
            continue;
        }

        // sync() must run before copy(): while a COPY is starting it
        // refreshes last_seq to the newest record
        let mut worked = client.sync();
        if client.status == Status::Copy && client.copy() {
            worked = true;
        }

        if !worked {
            if idle >= NOOP_IDLES {
                idle = 0;
                client.noop();
            } else {
                idle += 1;
                std::thread::sleep(TICK_INTERVAL);
            }
        } else {
            idle = 0;
        }

        let pending = client.link.output.len();
        if client.link.flush().is_err() {
            info!(remote = %remote, "sync client send error");
            break;
        }
        workers.lock().insert(id, publish(&client));

        if sync_speed > 0 && pending > 0 {
            let mib = pending as f64 / (1024.0 * 1024.0);
            let secs = mib / sync_speed as f64;
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
    }

    info!(remote = %remote, "sync client quit");
    workers.lock().remove(&id);
}

impl Client {
    /// Parse the `sync140` request and choose the starting state.
    fn init(&mut self, req: &Request) {
        self.last_seq = req.rec(1).and_then(parse_u64).unwrap_or(0);
        self.last_key = req.rec(2).map(<[u8]>::to_vec).unwrap_or_default();
        self.is_mirror = req.rec(3) == Some(&b"mirror"[..]);

        // an empty last_key with a non-zero seq means the copy already
        // finished in an earlier session: go straight to SYNC
        if self.last_key.is_empty() && self.last_seq != 0 {
            info!(
                mirror = self.is_mirror,
                last_seq = self.last_seq,
                "sync resume"
            );
            self.status = Status::Sync;
            let log = Binlog::new(self.last_seq, LogType::Copy, LogCommand::End, b"");
            self.link.send(&[&log.encode(), COPY_END_TAG]);
        } else {
            info!(
                mirror = self.is_mirror,
                last_seq = self.last_seq,
                "copy recover"
            );
            self.status = Status::Copy;
        }
    }

    /// Restart from scratch after the binlog was trimmed past us.
    fn reset(&mut self) {
        info!(remote = %self.link.remote_addr, "copy begin");
        self.status = Status::Copy;
        self.last_seq = 0;
        self.last_key = Vec::new();
        self.iter = None;
        let log = Binlog::new(self.last_seq, LogType::Copy, LogCommand::Begin, b"");
        self.link.send(&[&log.encode(), COPY_BEGIN_TAG]);
    }

    /// Heartbeat carrying the current sequence.
    fn noop(&mut self) {
        let seq = if self.status == Status::Copy && self.last_key.is_empty() {
            0
        } else {
            self.last_noop_seq = self.last_seq;
            self.last_seq
        };
        let noop = Binlog::new(seq, LogType::Noop, LogCommand::None, b"");
        self.link.send(&[&noop.encode()]);
    }

    /// Ship one batch of snapshot keys; advance to SYNC when exhausted.
    fn copy(&mut self) -> bool {
        if self.iter.is_none() {
            debug!(
                last_key = %String::from_utf8_lossy(&self.last_key),
                "new copy iterator"
            );
            self.iter = Some(self.store.copy_iter(&self.last_key));
        }

        let mut worked = false;
        let mut iterated: u32 = 0;
        let started = Instant::now();
        loop {
            iterated += 1;
            if iterated > COPY_BATCH_KEYS || self.link.output.len() > COPY_BATCH_BYTES {
                return worked;
            }
            if started.elapsed() > COPY_BATCH_TIME {
                info!("copy blocks too long, flush");
                return worked;
            }

            let (key, value) = match self.iter.as_mut().and_then(|it| it.next()) {
                None => break,
                Some(kv) => kv,
            };
            if key.is_empty() {
                continue;
            }
            // past the last user-data tag: every valid type is shipped
            if key[0] > tag::MAX_PREFIX {
                break;
            }
            self.last_key = key.clone();

            let cmd = match key[0] {
                t if t == tag::KV => LogCommand::KSet,
                t if t == tag::HASH => LogCommand::HSet,
                t if t == tag::ZSET => LogCommand::ZSet,
                t if t == tag::QUEUE => LogCommand::QPushBack,
                _ => continue,
            };
            worked = true;
            let log = Binlog::new(self.last_seq, LogType::Copy, cmd, &key);
            trace!("copy {}", log.dumps());
            self.link.send(&[&log.encode(), &value]);
        }

        // iterator exhausted
        info!(remote = %self.link.remote_addr, "copy end");
        self.status = Status::Sync;
        self.iter = None;
        let log = Binlog::new(self.last_seq, LogType::Copy, LogCommand::End, b"");
        self.link.send(&[&log.encode(), COPY_END_TAG]);
        true
    }

    /// Ship at most one binlog record; detect gaps.
    fn sync(&mut self) -> bool {
        let log = loop {
            let expect_seq = self.last_seq + 1;
            let found = if self.status == Status::Copy && self.last_seq == 0 {
                self.store.binlog().find_last()
            } else {
                self.store.binlog().find_next(expect_seq)
            };
            let log = match found {
                Err(e) => {
                    warn!("binlog read failed: {}", e);
                    return false;
                }
                Ok(None) => return false,
                Ok(Some(log)) => log,
            };

            // a record past the copy cursor will be shipped by the
            // iterator instead; the live iterator predates this write, so
            // force a fresh one
            if self.status == Status::Copy && log.key() > self.last_key.as_slice() {
                debug!("drop {}", log.dumps());
                self.last_seq = log.seq();
                self.iter = None;
                continue;
            }

            if self.last_seq != 0 && log.seq() != expect_seq {
                warn!(
                    log_seq = log.seq(),
                    expect_seq,
                    remote = %self.link.remote_addr,
                    "OUT_OF_SYNC!"
                );
                self.status = Status::OutOfSync;
                return true;
            }

            self.last_seq = log.seq();

            // a mirror-origin record never goes back to a mirror peer;
            // heartbeat occasionally so the peer's checkpoint advances
            if log.log_type() == LogType::Mirror && self.is_mirror {
                if self.last_seq - self.last_noop_seq >= MIRROR_NOOP_GAP {
                    self.noop();
                    return true;
                }
                continue;
            }
            break log;
        };

        if log.cmd().carries_value() {
            match self.store.raw_get(log.key()) {
                Err(e) => warn!("raw_get failed: {}", e),
                Ok(None) => trace!("skip vanished {}", log.dumps()),
                Ok(Some(value)) => {
                    trace!("sync {}", log.dumps());
                    self.link.send(&[&log.encode(), &value]);
                }
            }
        } else {
            trace!("sync {}", log.dumps());
            self.link.send(&[&log.encode()]);
        }
        true
    }
}
