//! End-to-end scenarios against a live server on loopback TCP.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use kite_engine::MemEngine;
use kite_net::{NetworkServer, ProcMap, ServerOptions};
use kite_store::Store;
use kitedb::{Config, DbServer};

struct TestServer {
    addr: SocketAddr,
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    serv: Arc<DbServer>,
}

impl TestServer {
    fn start(password: Option<&str>) -> TestServer {
        let store = Store::open(Arc::new(MemEngine::new()));
        let meta = Store::open_meta(Arc::new(MemEngine::new()));
        let config = Config::default();
        let serv = Arc::new(DbServer::new(store, meta, &config).unwrap());

        let mut proc_map = ProcMap::new();
        DbServer::register(&mut proc_map);

        let opts = ServerOptions {
            ip: "127.0.0.1".to_string(),
            port: 0,
            readers: 2,
            writers: 1,
            password: password.map(str::to_string),
            allow: Vec::new(),
            deny: Vec::new(),
        };
        let mut server = NetworkServer::bind(opts, Arc::clone(&serv), proc_map).unwrap();
        let addr = server.local_addr().unwrap();
        let quit = server.shutdown_handle();
        let handle = std::thread::spawn(move || {
            server.serve().unwrap();
        });
        TestServer {
            addr,
            quit,
            handle: Some(handle),
            serv,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.quit.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.serv.stop_slaves();
    }
}

struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl TestClient {
    fn connect(addr: SocketAddr) -> TestClient {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        TestClient {
            stream,
            buf: Vec::new(),
        }
    }

    fn request(&mut self, args: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for a in args {
            out.extend_from_slice(a.len().to_string().as_bytes());
            out.push(b'\n');
            out.extend_from_slice(a);
            out.push(b'\n');
        }
        out.push(b'\n');
        self.stream.write_all(&out).unwrap();
        self.read_frame()
    }

    fn read_frame(&mut self) -> Vec<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((records, consumed)) = parse_frame(&self.buf) {
                self.buf.drain(..consumed);
                return records;
            }
            let n = self.stream.read(&mut chunk).expect("server reply");
            assert!(n > 0, "server closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn parse_frame(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let mut pos = 0;
    let mut records = Vec::new();
    loop {
        let nl = pos + buf[pos..].iter().position(|&b| b == b'\n')?;
        let head = &buf[pos..nl];
        if head.is_empty() {
            return Some((records, nl + 1));
        }
        let len: usize = std::str::from_utf8(head).ok()?.parse().ok()?;
        let body_start = nl + 1;
        let body_end = body_start + len;
        if body_end + 1 > buf.len() {
            return None;
        }
        records.push(buf[body_start..body_end].to_vec());
        pos = body_end + 1; // trailing '\n'
    }
}

fn strs(records: &[Vec<u8>]) -> Vec<String> {
    records
        .iter()
        .map(|r| String::from_utf8_lossy(r).to_string())
        .collect()
}

#[test]
fn test_s1_set_get_not_found() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"set", b"foo", b"bar"]);
    assert_eq!(resp[0], b"ok");

    let resp = client.request(&[b"get", b"foo"]);
    assert_eq!(strs(&resp), vec!["ok", "bar"]);

    let resp = client.request(&[b"get", b"baz"]);
    assert_eq!(strs(&resp), vec!["not_found"]);
}

#[test]
fn test_s2_multi_set_and_keys() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"multi_set", b"a", b"1", b"b", b"2", b"c", b"3"]);
    assert_eq!(strs(&resp), vec!["ok", "3"]);

    let resp = client.request(&[b"keys", b"", b"", b"10"]);
    assert_eq!(strs(&resp), vec!["ok", "a", "b", "c"]);
}

#[test]
fn test_s3_zset_ordering_and_rank() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    client.request(&[b"zset", b"s", b"alice", b"100"]);
    client.request(&[b"zset", b"s", b"bob", b"-5"]);
    client.request(&[b"zset", b"s", b"carol", b"50"]);

    let resp = client.request(&[b"zrange", b"s", b"0", b"-1", b"withscores"]);
    assert_eq!(
        strs(&resp),
        vec!["ok", "bob", "-5", "carol", "50", "alice", "100"]
    );

    let resp = client.request(&[b"zrank", b"s", b"carol"]);
    assert_eq!(strs(&resp), vec!["ok", "1"]);
}

#[test]
fn test_s4_queue_operations() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    client.request(&[b"qpush_back", b"q", b"x"]);
    client.request(&[b"qpush_back", b"q", b"y"]);
    client.request(&[b"qpush_front", b"q", b"z"]);

    let resp = client.request(&[b"qslice", b"q", b"0", b"-1"]);
    assert_eq!(strs(&resp), vec!["ok", "z", "x", "y"]);

    let resp = client.request(&[b"qpop_front", b"q"]);
    assert_eq!(strs(&resp), vec!["ok", "z"]);

    let resp = client.request(&[b"qsize", b"q"]);
    assert_eq!(strs(&resp), vec!["ok", "2"]);
}

#[test]
fn test_hash_commands() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"hset", b"h", b"f", b"v"]);
    assert_eq!(strs(&resp), vec!["ok", "1"]);
    let resp = client.request(&[b"hset", b"h", b"f", b"w"]);
    assert_eq!(strs(&resp), vec!["ok", "0"]);
    let resp = client.request(&[b"hget", b"h", b"f"]);
    assert_eq!(strs(&resp), vec!["ok", "w"]);
    let resp = client.request(&[b"hsize", b"h"]);
    assert_eq!(strs(&resp), vec!["ok", "1"]);
    let resp = client.request(&[b"hgetall", b"h"]);
    assert_eq!(strs(&resp), vec!["ok", "f", "w"]);
    let resp = client.request(&[b"hdel", b"h", b"f"]);
    assert_eq!(strs(&resp), vec!["ok", "1"]);
    let resp = client.request(&[b"hget", b"h", b"f"]);
    assert_eq!(strs(&resp), vec!["not_found"]);
}

#[test]
fn test_unknown_command_and_arity() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"frobnicate"]);
    assert_eq!(resp[0], b"client_error");

    let resp = client.request(&[b"get"]);
    assert_eq!(strs(&resp), vec!["client_error", "wrong number of arguments"]);
}

#[test]
fn test_incr_and_not_numeric() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"incr", b"n", b"5"]);
    assert_eq!(strs(&resp), vec!["ok", "5"]);
    let resp = client.request(&[b"decr", b"n", b"2"]);
    assert_eq!(strs(&resp), vec!["ok", "3"]);

    // incrementing a non-numeric value is a non-error no-op
    client.request(&[b"set", b"s", b"abc"]);
    let resp = client.request(&[b"incr", b"s", b"1"]);
    assert_eq!(strs(&resp), vec!["ok", "0"]);
    let resp = client.request(&[b"get", b"s"]);
    assert_eq!(strs(&resp), vec!["ok", "abc"]);
}

#[test]
fn test_auth_gate() {
    let password = "correct-horse-battery-staple-000042";
    let server = TestServer::start(Some(password));
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"get", b"foo"]);
    assert_eq!(resp[0], b"noauth");

    let resp = client.request(&[b"auth", b"wrong"]);
    assert_eq!(resp[0], b"error");

    let resp = client.request(&[b"auth", password.as_bytes()]);
    assert_eq!(resp[0], b"ok");

    let resp = client.request(&[b"get", b"foo"]);
    assert_eq!(resp[0], b"not_found");
}

#[test]
fn test_weak_password_refused_at_bind() {
    let store = Store::open(Arc::new(MemEngine::new()));
    let meta = Store::open_meta(Arc::new(MemEngine::new()));
    let serv = Arc::new(DbServer::new(store, meta, &Config::default()).unwrap());
    let mut proc_map = ProcMap::new();
    DbServer::register(&mut proc_map);
    let opts = ServerOptions {
        port: 0,
        password: Some("short".to_string()),
        ..ServerOptions::default()
    };
    assert!(NetworkServer::bind(opts, serv, proc_map).is_err());
}

#[test]
fn test_ping_info_and_ignore_key_range() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    let resp = client.request(&[b"ping"]);
    assert_eq!(strs(&resp), vec!["ok"]);

    let resp = client.request(&[b"info"]);
    assert_eq!(resp[0], b"ok");
    let text = strs(&resp).join(" ");
    assert!(text.contains("version"));
    assert!(text.contains("binlog_last_seq"));

    // gate a range, watch a key bounce, then bypass it on this link
    let resp = client.request(&[b"set_kv_range", b"a", b"b"]);
    assert_eq!(resp[0], b"ok");
    let resp = client.request(&[b"set", b"zz", b"v"]);
    assert_eq!(resp[0], b"out_of_range");
    let resp = client.request(&[b"ignore_key_range"]);
    assert_eq!(resp[0], b"ok");
    let resp = client.request(&[b"set", b"zz", b"v"]);
    assert_eq!(resp[0], b"ok");
}

#[test]
fn test_dump_streams_whole_keyspace() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);
    client.request(&[b"set", b"foo", b"bar"]);
    client.request(&[b"set", b"baz", b"qux"]);

    let mut dumper = TestClient::connect(server.addr);
    let mut out = Vec::new();
    for a in [&b"dump"[..]] {
        out.extend_from_slice(a.len().to_string().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(a);
        out.push(b'\n');
    }
    out.push(b'\n');
    dumper.stream.write_all(&out).unwrap();

    let first = dumper.read_frame();
    assert_eq!(strs(&first), vec!["begin"]);
    let mut sets = 0;
    loop {
        let frame = dumper.read_frame();
        match frame[0].as_slice() {
            b"set" => {
                assert_eq!(frame.len(), 3);
                sets += 1;
            }
            b"end" => {
                let n: usize = String::from_utf8_lossy(&frame[1]).parse().unwrap();
                assert_eq!(n, sets);
                break;
            }
            other => panic!("unexpected dump frame: {:?}", other),
        }
    }
    // two kv entries plus their binlog records are all within the default
    // dump window; at least the kv entries must be present
    assert!(sets >= 2);
}

#[test]
fn test_redis_protocol_adapter() {
    let server = TestServer::start(None);
    let mut stream = TcpStream::connect(server.addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .unwrap();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"+OK\r\n");

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .unwrap();
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"$3\r\nbar\r\n");

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nnope\r\n")
        .unwrap();
    let n = stream.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"$-1\r\n");
}

#[test]
fn test_pipelined_requests_on_one_link() {
    let server = TestServer::start(None);
    let mut client = TestClient::connect(server.addr);

    // two full frames in one write; both answers must come back in order
    let mut out = Vec::new();
    for args in [&[&b"set"[..], b"k", b"v"][..], &[&b"get"[..], b"k"][..]] {
        for a in args {
            out.extend_from_slice(a.len().to_string().as_bytes());
            out.push(b'\n');
            out.extend_from_slice(a);
            out.push(b'\n');
        }
        out.push(b'\n');
    }
    client.stream.write_all(&out).unwrap();

    let first = client.read_frame();
    assert_eq!(first[0], b"ok");
    let second = client.read_frame();
    assert_eq!(strs(&second), vec!["ok", "v"]);
}
