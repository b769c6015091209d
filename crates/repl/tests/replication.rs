//! End-to-end replication over loopback TCP.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use kite_core::LogType;
use kite_engine::MemEngine;
use kite_net::Link;
use kite_repl::{BackendSync, Slave, SlaveStatus};
use kite_store::Store;

/// Accept connections and hand `sync140` links to the backend.
fn start_primary(backend: Arc<BackendSync>) -> (SocketAddr, Arc<AtomicBool>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();
    let quit = Arc::new(AtomicBool::new(false));
    let quit2 = Arc::clone(&quit);
    let handle = std::thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).unwrap();
                let mut link = Link::from_stream(stream, peer);
                if let Some(req) = read_request(&mut link) {
                    if req.cmd() == b"sync140" {
                        backend.proc(link, &req);
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if quit2.load(Ordering::SeqCst) {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(_) => break,
        }
    });
    (addr, quit, handle)
}

fn read_request(link: &mut Link) -> Option<kite_net::Request> {
    link.set_read_timeout(Some(Duration::from_millis(100))).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(Some(req)) = link.recv() {
            return Some(req);
        }
        match link.read() {
            Ok(0) => return None,
            Ok(_) => {}
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(_) => return None,
        }
        if Instant::now() > deadline {
            return None;
        }
    }
}

fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn test_replica_converges_through_copy_and_sync() {
    let primary = Store::open(Arc::new(MemEngine::new()));
    // data present before the replica ever connects (COPY path)
    primary.set(b"k1", b"v1", LogType::Sync).unwrap();
    primary.hset(b"h", b"f", b"hv", LogType::Sync).unwrap();
    primary.zset(b"z", b"alice", 100, LogType::Sync).unwrap();
    primary.zset(b"z", b"bob", -5, LogType::Sync).unwrap();
    primary.qpush_back(b"q", b"job1", LogType::Sync).unwrap();
    primary.qpush_back(b"q", b"job2", LogType::Sync).unwrap();

    let backend = Arc::new(BackendSync::new(primary.clone(), 0));
    let (addr, accept_quit, accept_handle) = start_primary(Arc::clone(&backend));

    let replica = Store::open(Arc::new(MemEngine::new()));
    let meta = Store::open_meta(Arc::new(MemEngine::new()));
    let mut slave = Slave::new(
        replica.clone(),
        meta.clone(),
        "127.0.0.1",
        addr.port(),
        false,
    );
    slave.start();

    wait_until("copy to finish", Duration::from_secs(15), || {
        replica.get(b"k1").unwrap() == Some(b"v1".to_vec())
            && replica.qsize(b"q").unwrap() == 2
    });

    // writes arriving while the replica is connected (SYNC path)
    primary.set(b"k2", b"v2", LogType::Sync).unwrap();
    primary.hdel(b"h", b"f", LogType::Sync).unwrap();
    primary.zset(b"z", b"carol", 50, LogType::Sync).unwrap();
    primary.qpop_front(b"q", LogType::Sync).unwrap();

    let primary_seq = primary.binlog().last_seq();
    wait_until("replica to catch up", Duration::from_secs(15), || {
        slave.progress().last_seq >= primary_seq
    });

    // user-visible state is identical on every data model
    assert_eq!(replica.get(b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(replica.get(b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(replica.hget(b"h", b"f").unwrap(), None);
    assert_eq!(replica.hsize(b"h").unwrap(), 0);
    let scores: Vec<(Vec<u8>, i64)> = replica.zrange(b"z", 0, 100).collect();
    assert_eq!(
        scores,
        vec![
            (b"bob".to_vec(), -5),
            (b"carol".to_vec(), 50),
            (b"alice".to_vec(), 100),
        ]
    );
    assert_eq!(replica.qslice(b"q", 0, -1).unwrap(), vec![b"job2".to_vec()]);
    assert_eq!(slave.progress().last_seq, primary_seq);

    slave.stop();
    accept_quit.store(true, Ordering::SeqCst);
    accept_handle.join().unwrap();
}

#[test]
fn test_checkpoint_resume_survives_reconnect() {
    let primary = Store::open(Arc::new(MemEngine::new()));
    primary.set(b"a", b"1", LogType::Sync).unwrap();

    let backend = Arc::new(BackendSync::new(primary.clone(), 0));
    let (addr, accept_quit, accept_handle) = start_primary(Arc::clone(&backend));

    let replica = Store::open(Arc::new(MemEngine::new()));
    let meta = Store::open_meta(Arc::new(MemEngine::new()));

    {
        let mut slave = Slave::new(
            replica.clone(),
            meta.clone(),
            "127.0.0.1",
            addr.port(),
            false,
        );
        slave.start();
        let seq = primary.binlog().last_seq();
        wait_until("first session to catch up", Duration::from_secs(15), || {
            slave.progress().last_seq >= seq
        });
        slave.stop();
    }

    // more writes while disconnected
    primary.set(b"b", b"2", LogType::Sync).unwrap();

    // a second session resumes from the stored checkpoint (SYNC, no COPY)
    let mut slave = Slave::new(
        replica.clone(),
        meta.clone(),
        "127.0.0.1",
        addr.port(),
        false,
    );
    slave.start();
    let seq = primary.binlog().last_seq();
    wait_until("resumed session to catch up", Duration::from_secs(15), || {
        slave.progress().last_seq >= seq
    });
    assert_eq!(replica.get(b"b").unwrap(), Some(b"2".to_vec()));

    slave.stop();
    accept_quit.store(true, Ordering::SeqCst);
    accept_handle.join().unwrap();
}

#[test]
fn test_out_of_sync_triggers_fresh_copy() {
    // a tiny binlog capacity so the cleaner trims quickly
    let primary = Store::open_with_capacity(Arc::new(MemEngine::new()), 20);
    for i in 0..100 {
        primary
            .set(format!("key{:03}", i).as_bytes(), b"v", LogType::Sync)
            .unwrap();
    }
    wait_until("binlog trim", Duration::from_secs(10), || {
        primary.binlog().stats().0 > 5
    });

    let backend = Arc::new(BackendSync::new(primary.clone(), 0));
    let (addr, accept_quit, accept_handle) = start_primary(Arc::clone(&backend));

    let replica = Store::open(Arc::new(MemEngine::new()));
    let meta = Store::open_meta(Arc::new(MemEngine::new()));

    // forge a stale checkpoint: sequences the primary no longer retains
    let status_key = format!("slave.status.127.0.0.1|{}", addr.port());
    meta.hset(status_key.as_bytes(), b"last_seq", b"5", LogType::Sync)
        .unwrap();

    let mut slave = Slave::new(
        replica.clone(),
        meta.clone(),
        "127.0.0.1",
        addr.port(),
        false,
    );
    slave.start();

    let primary_seq = primary.binlog().last_seq();
    wait_until("recovery copy to converge", Duration::from_secs(20), || {
        slave.progress().last_seq >= primary_seq
    });
    for i in 0..100 {
        assert_eq!(
            primary.get(format!("key{:03}", i).as_bytes()).unwrap(),
            replica.get(format!("key{:03}", i).as_bytes()).unwrap(),
            "key{:03} differs after recovery",
            i
        );
    }

    slave.stop();
    accept_quit.store(true, Ordering::SeqCst);
    accept_handle.join().unwrap();
}

#[test]
fn test_mirror_pair_breaks_replication_loop() {
    let store_a = Store::open(Arc::new(MemEngine::new()));
    let store_b = Store::open(Arc::new(MemEngine::new()));

    let backend_a = Arc::new(BackendSync::new(store_a.clone(), 0));
    let backend_b = Arc::new(BackendSync::new(store_b.clone(), 0));
    let (addr_a, quit_a, handle_a) = start_primary(Arc::clone(&backend_a));
    let (addr_b, quit_b, handle_b) = start_primary(Arc::clone(&backend_b));

    // A pulls from B and B pulls from A, both in mirror mode
    let meta_a = Store::open_meta(Arc::new(MemEngine::new()));
    let meta_b = Store::open_meta(Arc::new(MemEngine::new()));
    let mut slave_on_a = Slave::new(store_a.clone(), meta_a, "127.0.0.1", addr_b.port(), true);
    let mut slave_on_b = Slave::new(store_b.clone(), meta_b, "127.0.0.1", addr_a.port(), true);
    slave_on_a.start();
    slave_on_b.start();

    // both sessions finish their (empty) copy phase before any write
    wait_until("mirror sessions to settle", Duration::from_secs(15), || {
        slave_on_a.progress().status == SlaveStatus::Sync
            && slave_on_b.progress().status == SlaveStatus::Sync
    });

    // one client write at A
    store_a.set(b"shared", b"from-a", LogType::Sync).unwrap();

    wait_until("write to reach B", Duration::from_secs(15), || {
        store_b.get(b"shared").unwrap() == Some(b"from-a".to_vec())
    });

    // exactly one local apply at B, and no echo back to A
    let seq_a = store_a.binlog().last_seq();
    let seq_b = store_b.binlog().last_seq();
    std::thread::sleep(Duration::from_secs(4));
    assert_eq!(
        store_a.binlog().last_seq(),
        seq_a,
        "write echoed back to A: replication loop"
    );
    assert_eq!(
        store_b.binlog().last_seq(),
        seq_b,
        "write re-applied at B: replication loop"
    );
    assert_eq!(store_a.get(b"shared").unwrap(), Some(b"from-a".to_vec()));

    // the record B applied is marked MIRROR so it is never re-forwarded
    let log = store_b.binlog().find_last().unwrap().unwrap();
    assert_eq!(log.log_type(), LogType::Mirror);

    slave_on_a.stop();
    slave_on_b.stop();
    quit_a.store(true, Ordering::SeqCst);
    quit_b.store(true, Ordering::SeqCst);
    handle_a.join().unwrap();
    handle_b.join().unwrap();
}
