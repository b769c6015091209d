//! Replica-side replication: consume and re-apply the binlog stream.
//!
//! One thread per configured upstream. The thread reconnects with backoff,
//! authenticates, sends `sync140 <last_seq> <last_key> <sync|mirror>` and
//! then applies records as they arrive, persisting its checkpoint
//! `(last_seq, last_key)` in the metadata store after every record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use kite_core::codec::{decode_hash_key, decode_kv_key, decode_qitem_key, decode_zset_key};
use kite_core::limits::{QITEM_MAX_SEQ, QITEM_MIN_SEQ};
use kite_core::strings::{parse_i64_lossy, parse_u64};
use kite_core::{LogCommand, LogType, Result};
use kite_net::Link;
use kite_store::{Binlog, Store};

/// Blocking-read window; idle ticks accumulate toward the reconnect limit.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);
/// Reconnect after this long without any data (300 s).
const MAX_RECV_IDLE: u32 = 1500;
/// Only every Nth connect attempt actually dials.
const CONNECT_RETRY_EVERY: u64 = 50;

/// Replica state, for `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveStatus {
    /// No connection to the primary.
    Disconnected,
    /// Connected, sync140 sent.
    Init,
    /// Receiving the snapshot stream.
    Copy,
    /// Receiving the binlog tail.
    Sync,
}

impl SlaveStatus {
    /// State name for stats output.
    pub fn name(self) -> &'static str {
        match self {
            SlaveStatus::Disconnected => "DISCONNECTED",
            SlaveStatus::Init => "INIT",
            SlaveStatus::Copy => "COPY",
            SlaveStatus::Sync => "SYNC",
        }
    }
}

/// Shared, externally visible progress counters.
#[derive(Debug, Clone)]
pub struct SlaveProgress {
    /// Current connection state.
    pub status: SlaveStatus,
    /// Last applied sequence.
    pub last_seq: u64,
    /// Records applied during COPY phases.
    pub copy_count: u64,
    /// Records applied during SYNC phases.
    pub sync_count: u64,
}

/// A replication client pulling from one primary.
pub struct Slave {
    store: Store,
    meta: Store,
    master_ip: String,
    master_port: u16,
    is_mirror: bool,
    auth: Option<String>,
    id: String,
    progress: Arc<Mutex<SlaveProgress>>,
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Slave {
    /// Configure a replica of `master_ip:master_port`.
    ///
    /// `is_mirror` selects the binlog type used when re-applying records,
    /// which is what keeps mirrored setups loop-free.
    pub fn new(
        store: Store,
        meta: Store,
        master_ip: &str,
        master_port: u16,
        is_mirror: bool,
    ) -> Slave {
        let id = format!("{}|{}", master_ip, master_port);
        Slave {
            store,
            meta,
            master_ip: master_ip.to_string(),
            master_port,
            is_mirror,
            auth: None,
            id,
            progress: Arc::new(Mutex::new(SlaveProgress {
                status: SlaveStatus::Disconnected,
                last_seq: 0,
                copy_count: 0,
                sync_count: 0,
            })),
            quit: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Password sent to the primary before `sync140`.
    pub fn set_auth(&mut self, password: &str) {
        self.auth = Some(password.to_string());
    }

    /// Checkpoint identity, derived from the primary address.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Progress snapshot.
    pub fn progress(&self) -> SlaveProgress {
        self.progress.lock().clone()
    }

    /// Load the checkpoint and start the replication thread.
    pub fn start(&mut self) {
        let mut runner = SlaveRunner {
            store: self.store.clone(),
            meta: self.meta.clone(),
            master_ip: self.master_ip.clone(),
            master_port: self.master_port,
            is_mirror: self.is_mirror,
            log_type: if self.is_mirror {
                LogType::Mirror
            } else {
                LogType::Sync
            },
            auth: self.auth.clone(),
            id: self.id.clone(),
            last_seq: 0,
            last_key: Vec::new(),
            progress: Arc::clone(&self.progress),
            quit: Arc::clone(&self.quit),
        };
        if let Err(e) = runner.migrate_old_status() {
            error!(id = %self.id, "checkpoint migration failed: {}", e);
        }
        if let Err(e) = runner.load_status() {
            error!(id = %self.id, "checkpoint load failed: {}", e);
        }
        debug!(
            id = %self.id,
            last_seq = runner.last_seq,
            "slave starting"
        );
        let handle = std::thread::Builder::new()
            .name(format!("kite-slave-{}", self.master_port))
            .spawn(move || runner.run())
            .expect("failed to spawn slave thread");
        self.handle = Some(handle);
    }

    /// Signal the thread and join it.
    pub fn stop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Slave {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
        debug!(id = %self.id, "slave finalized");
    }
}

struct SlaveRunner {
    store: Store,
    meta: Store,
    master_ip: String,
    master_port: u16,
    is_mirror: bool,
    log_type: LogType,
    auth: Option<String>,
    id: String,
    last_seq: u64,
    last_key: Vec<u8>,
    progress: Arc<Mutex<SlaveProgress>>,
    quit: Arc<AtomicBool>,
}

impl SlaveRunner {
    fn status_key(&self) -> Vec<u8> {
        format!("slave.status.{}", self.id).into_bytes()
    }

    /// Convert a pre-hash checkpoint left by an older release, then
    /// delete it.
    fn migrate_old_status(&mut self) -> Result<()> {
        let old_key = format!("new.slave.status.{}", self.id).into_bytes();
        let value = match self.meta.raw_get(&old_key)? {
            None => return Ok(()),
            Some(v) => v,
        };
        if value.len() < 8 {
            warn!("invalid legacy checkpoint format");
            return Ok(());
        }
        let bytes: [u8; 8] = value[..8].try_into().expect("length checked");
        self.last_seq = u64::from_le_bytes(bytes);
        self.last_key = value[8..].to_vec();
        info!(
            last_seq = self.last_seq,
            "migrated legacy slave checkpoint"
        );
        self.save_status()?;
        self.meta.raw_del(&old_key)
    }

    fn load_status(&mut self) -> Result<()> {
        let status_key = self.status_key();
        if let Some(key) = self.meta.hget(&status_key, b"last_key")? {
            self.last_key = key;
        }
        if let Some(seq) = self.meta.hget(&status_key, b"last_seq")? {
            self.last_seq = parse_u64(&seq).unwrap_or(0);
        }
        Ok(())
    }

    fn save_status(&self) -> Result<()> {
        let status_key = self.status_key();
        self.meta
            .hset(&status_key, b"last_key", &self.last_key, LogType::Sync)?;
        self.meta.hset(
            &status_key,
            b"last_seq",
            self.last_seq.to_string().as_bytes(),
            LogType::Sync,
        )?;
        Ok(())
    }

    fn set_status(&self, status: SlaveStatus) {
        let mut p = self.progress.lock();
        p.status = status;
        p.last_seq = self.last_seq;
    }

    /// Dial the primary; only every Nth call really tries.
    fn connect(&mut self, connect_retry: &mut u64) -> Option<Link> {
        *connect_retry += 1;
        if *connect_retry % CONNECT_RETRY_EVERY != 1 {
            return None;
        }
        let addr = (self.master_ip.as_str(), self.master_port);
        info!(id = %self.id, "connecting to primary");
        let mut link = match Link::connect(addr) {
            Err(e) => {
                warn!(id = %self.id, "connect failed: {}", e);
                return None;
            }
            Ok(link) => link,
        };
        *connect_retry = 0;
        self.set_status(SlaveStatus::Init);

        if let Some(password) = self.auth.clone() {
            match link.request(&[b"auth", password.as_bytes()]) {
                Ok(resp) if resp.first().map(Vec::as_slice) == Some(&b"ok"[..]) => {}
                _ => {
                    warn!(id = %self.id, "auth with primary failed");
                    std::thread::sleep(Duration::from_secs(1));
                    return None;
                }
            }
        }

        let kind: &[u8] = if self.is_mirror { b"mirror" } else { b"sync" };
        link.send(&[
            b"sync140",
            self.last_seq.to_string().as_bytes(),
            &self.last_key,
            kind,
        ]);
        if link.flush().is_err() {
            warn!(id = %self.id, "network error sending sync140");
            return None;
        }
        let _ = link.set_read_timeout(Some(RECV_TIMEOUT));
        info!(id = %self.id, last_seq = self.last_seq, "ready to receive binlogs");
        Some(link)
    }

    fn run(&mut self) {
        let mut link: Option<Link> = None;
        let mut connect_retry: u64 = 0;
        let mut idle: u32 = 0;

        while !self.quit.load(Ordering::SeqCst) {
            let current = match link.as_mut() {
                None => {
                    self.set_status(SlaveStatus::Disconnected);
                    match self.connect(&mut connect_retry) {
                        Some(l) => {
                            idle = 0;
                            link = Some(l);
                            continue;
                        }
                        None => {
                            std::thread::sleep(Duration::from_millis(100));
                            continue;
                        }
                    }
                }
                Some(l) => l,
            };

            match current.read() {
                Ok(0) => {
                    warn!(id = %self.id, "primary closed the connection");
                    link = None;
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
                Ok(_) => idle = 0,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    idle += 1;
                    if idle >= MAX_RECV_IDLE {
                        warn!(id = %self.id, "primary silent too long, reconnecting");
                        idle = 0;
                        link = None;
                        std::thread::sleep(Duration::from_secs(1));
                    }
                    continue;
                }
                Err(e) => {
                    warn!(id = %self.id, "read failed: {}, reconnecting", e);
                    link = None;
                    std::thread::sleep(Duration::from_secs(1));
                    continue;
                }
            }

            // drain every complete frame we have buffered
            let mut drop_link = false;
            loop {
                match current.recv() {
                    Err(e) => {
                        warn!(id = %self.id, "frame parse failed: {}", e);
                        drop_link = true;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(req)) => {
                        if req.cmd() == b"noauth" {
                            warn!(id = %self.id, "authentication required");
                            drop_link = true;
                            std::thread::sleep(Duration::from_secs(1));
                            break;
                        }
                        if let Err(e) = self.apply_frame(req.records()) {
                            warn!(id = %self.id, "apply failed: {}, reconnecting", e);
                            drop_link = true;
                            break;
                        }
                    }
                }
            }
            if drop_link {
                link = None;
                std::thread::sleep(Duration::from_secs(1));
            }
        }
        info!(id = %self.id, "slave thread quit");
    }

    /// Apply one `(binlog, value?)` frame from the primary.
    fn apply_frame(&mut self, records: &[Vec<u8>]) -> Result<()> {
        let log = match Binlog::decode(&records[0]) {
            Err(e) => {
                warn!("invalid binlog frame: {}", e);
                return Ok(());
            }
            Ok(log) => log,
        };
        match log.log_type() {
            LogType::Noop => self.apply_noop(&log),
            LogType::Copy => {
                self.set_status(SlaveStatus::Copy);
                self.apply_copy(&log, records)
            }
            LogType::Sync | LogType::Mirror => {
                self.set_status(SlaveStatus::Sync);
                {
                    let mut p = self.progress.lock();
                    p.sync_count += 1;
                    if p.sync_count % 1000 == 1 {
                        info!(
                            sync_count = p.sync_count,
                            last_seq = self.last_seq,
                            seq = log.seq(),
                            "sync progress"
                        );
                    }
                }
                self.apply_mutation(&log, records)
            }
        }
    }

    fn apply_noop(&mut self, log: &Binlog) -> Result<()> {
        if self.last_seq != log.seq() {
            debug!(last_seq = self.last_seq, seq = log.seq(), "noop");
            self.last_seq = log.seq();
            self.save_status()?;
            self.set_status(SlaveStatus::Sync);
        }
        Ok(())
    }

    fn apply_copy(&mut self, log: &Binlog, records: &[Vec<u8>]) -> Result<()> {
        match log.cmd() {
            LogCommand::Begin => {
                info!(id = %self.id, "copy begin");
                Ok(())
            }
            LogCommand::End => {
                info!(
                    id = %self.id,
                    last_seq = log.seq(),
                    "copy end, entering sync"
                );
                self.last_seq = log.seq();
                self.last_key = Vec::new();
                self.set_status(SlaveStatus::Sync);
                self.save_status()
            }
            _ => {
                let mut p = self.progress.lock();
                p.copy_count += 1;
                if p.copy_count % 1000 == 1 {
                    info!(copy_count = p.copy_count, seq = log.seq(), "copy progress");
                }
                drop(p);
                self.apply_mutation(log, records)
            }
        }
    }

    fn apply_mutation(&mut self, log: &Binlog, records: &[Vec<u8>]) -> Result<()> {
        let value = records.get(1).map(Vec::as_slice);
        match log.cmd() {
            LogCommand::KSet => {
                if let (Some(value), Ok(key)) = (value, decode_kv_key(log.key())) {
                    trace!("apply set {}", String::from_utf8_lossy(&key));
                    self.store.set(&key, value, self.log_type)?;
                }
            }
            LogCommand::KDel => {
                if let Ok(key) = decode_kv_key(log.key()) {
                    trace!("apply del {}", String::from_utf8_lossy(&key));
                    self.store.del(&key, self.log_type)?;
                }
            }
            LogCommand::HSet => {
                if let (Some(value), Ok((name, key))) = (value, decode_hash_key(log.key())) {
                    self.store.hset(&name, &key, value, self.log_type)?;
                }
            }
            LogCommand::HDel => {
                if let Ok((name, key)) = decode_hash_key(log.key()) {
                    self.store.hdel(&name, &key, self.log_type)?;
                }
            }
            LogCommand::ZSet => {
                if let (Some(value), Ok((name, key))) = (value, decode_zset_key(log.key())) {
                    let score = parse_i64_lossy(value);
                    self.store.zset(&name, &key, score, self.log_type)?;
                }
            }
            LogCommand::ZDel => {
                if let Ok((name, key)) = decode_zset_key(log.key()) {
                    self.store.zdel(&name, &key, self.log_type)?;
                }
            }
            LogCommand::QSet | LogCommand::QPushBack | LogCommand::QPushFront => {
                if let (Some(value), Ok((name, seq))) = (value, decode_qitem_key(log.key())) {
                    if (QITEM_MIN_SEQ..=QITEM_MAX_SEQ).contains(&seq) {
                        match log.cmd() {
                            LogCommand::QSet => {
                                self.store.qset_by_seq(&name, seq, value, self.log_type)?;
                            }
                            LogCommand::QPushBack => {
                                self.store.qpush_back(&name, value, self.log_type)?;
                            }
                            _ => {
                                self.store.qpush_front(&name, value, self.log_type)?;
                            }
                        }
                    }
                }
            }
            LogCommand::QPopBack => {
                self.store.qpop_back(log.key(), self.log_type)?;
            }
            LogCommand::QPopFront => {
                self.store.qpop_front(log.key(), self.log_type)?;
            }
            other => {
                warn!(cmd = ?other, "unknown binlog command");
            }
        }
        self.last_seq = log.seq();
        if log.log_type() == LogType::Copy {
            self.last_key = log.key().to_vec();
        }
        {
            let mut p = self.progress.lock();
            p.last_seq = self.last_seq;
        }
        self.save_status()
    }
}
