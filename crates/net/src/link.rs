//! A network link: socket, stream buffers, per-connection flags.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use tracing::warn;

use kite_core::limits::MAX_PACKET_SIZE;
use kite_core::{Error, Result};

use crate::buffer::Buffer;
use crate::resp::RespAdapter;

/// One parsed request frame: the command name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    records: Vec<Vec<u8>>,
}

impl Request {
    /// Wrap parsed records.
    pub fn from_records(records: Vec<Vec<u8>>) -> Request {
        Request { records }
    }

    /// The command name (first record).
    pub fn cmd(&self) -> &[u8] {
        self.records.first().map(Vec::as_slice).unwrap_or(b"")
    }

    /// Record at `i` (0 is the command name).
    pub fn rec(&self, i: usize) -> Option<&[u8]> {
        self.records.get(i).map(Vec::as_slice)
    }

    /// Number of records including the command name.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the frame held no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records.
    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    /// Records from `i` onward.
    pub fn records_from(&self, i: usize) -> &[Vec<u8>] {
        if i >= self.records.len() {
            &[]
        } else {
            &self.records[i..]
        }
    }

    /// Consume into raw records.
    pub fn into_records(self) -> Vec<Vec<u8>> {
        self.records
    }
}

/// One response frame: a status word followed by data records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Response {
    records: Vec<Vec<u8>>,
}

impl Response {
    /// Empty response.
    pub fn new() -> Response {
        Response::default()
    }

    /// Append one record.
    pub fn push(&mut self, record: impl Into<Vec<u8>>) {
        self.records.push(record.into());
    }

    /// Append a decimal integer record.
    pub fn push_int(&mut self, v: i64) {
        self.records.push(v.to_string().into_bytes());
    }

    /// `ok`
    pub fn ok(&mut self) {
        self.push("ok");
    }

    /// `not_found`
    pub fn not_found(&mut self) {
        self.push("not_found");
    }

    /// `error <message>`
    pub fn error(&mut self, message: &str) {
        self.records.clear();
        self.push("error");
        self.push(message);
    }

    /// `client_error <message>`
    pub fn client_error(&mut self, message: &str) {
        self.records.clear();
        self.push("client_error");
        self.push(message);
    }

    /// `out_of_range`: the key is not served by this node.
    pub fn out_of_range(&mut self) {
        self.records.clear();
        self.push("out_of_range");
    }

    /// `ok <int>`
    pub fn reply_int(&mut self, v: i64) {
        self.ok();
        self.push_int(v);
    }

    /// `ok <value>` or `not_found`.
    pub fn reply_get(&mut self, value: Option<Vec<u8>>) {
        match value {
            Some(v) => {
                self.ok();
                self.push(v);
            }
            None => self.not_found(),
        }
    }

    /// `ok` followed by each record.
    pub fn reply_list(&mut self, records: impl IntoIterator<Item = Vec<u8>>) {
        self.ok();
        for r in records {
            self.records.push(r);
        }
    }

    /// Render an error into the wire status taxonomy.
    pub fn from_error(e: &Error) -> Response {
        let mut resp = Response::new();
        if e.is_client_error() {
            resp.client_error(&e.to_string());
        } else {
            resp.error(&e.to_string());
        }
        resp
    }

    /// The status word (first record).
    pub fn status(&self) -> &[u8] {
        self.records.first().map(Vec::as_slice).unwrap_or(b"")
    }

    /// All records.
    pub fn records(&self) -> &[Vec<u8>] {
        &self.records
    }

    /// True when nothing was pushed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A connection and everything scoped to it.
pub struct Link {
    stream: TcpStream,
    nonblocking: bool,
    /// Parsed-input buffer.
    pub input: Buffer,
    /// Pending-output buffer.
    pub output: Buffer,
    /// Peer address.
    pub remote_addr: SocketAddr,
    /// Set once `auth` succeeds on this link.
    pub auth: bool,
    /// Set when a migration peer asked to bypass range gating.
    pub ignore_key_range: bool,
    /// When the connection was accepted.
    pub create_time: Instant,
    /// Last request activity.
    pub active_time: Instant,
    redis: Option<RespAdapter>,
    error: bool,
}

impl Link {
    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream, remote_addr: SocketAddr) -> Link {
        let now = Instant::now();
        Link {
            stream,
            nonblocking: false,
            input: Buffer::new(),
            output: Buffer::new(),
            remote_addr,
            auth: false,
            ignore_key_range: false,
            create_time: now,
            active_time: now,
            redis: None,
            error: false,
        }
    }

    /// Open a blocking client connection.
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Link> {
        let stream = TcpStream::connect(addr)?;
        let remote = stream.peer_addr()?;
        set_keepalive(stream.as_raw_fd());
        Ok(Link::from_stream(stream, remote))
    }

    /// The socket's file descriptor.
    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Switch between non-blocking (event loop) and blocking (worker) mode.
    pub fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(nonblocking)?;
        self.nonblocking = nonblocking;
        Ok(())
    }

    /// Disable Nagle.
    pub fn set_nodelay(&self) -> io::Result<()> {
        self.stream.set_nodelay(true)
    }

    /// Bound blocking reads; `read` then surfaces `WouldBlock` on expiry.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Mark the link dead; the event loop reaps it.
    pub fn mark_error(&mut self) {
        self.error = true;
    }

    /// True once an I/O or protocol error occurred.
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Drain the socket into the input buffer.
    ///
    /// Returns bytes read; `Ok(0)` means the peer closed. In blocking mode
    /// one successful read is performed; timeouts surface as `WouldBlock`.
    pub fn read(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    self.input.append(&chunk[..n]);
                    total += n;
                    if !self.nonblocking {
                        return Ok(total);
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock && self.nonblocking =>
                {
                    return Ok(total)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Push the output buffer toward the socket.
    ///
    /// Non-blocking mode writes until the socket would block; blocking mode
    /// performs one write.
    pub fn write(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        while !self.output.is_empty() {
            match self.stream.write(self.output.as_slice()) {
                Ok(0) => break,
                Ok(n) => {
                    self.output.consume(n);
                    total += n;
                    if !self.nonblocking {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock && self.nonblocking =>
                {
                    break
                }
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Write until the output buffer is empty. Blocking-mode links only.
    pub fn flush(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        while !self.output.is_empty() {
            let n = self.write()?;
            if n == 0 && !self.output.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket made no progress",
                ));
            }
            total += n;
        }
        Ok(total)
    }

    /// Parse one complete request frame out of the input buffer.
    ///
    /// `Ok(None)` means more bytes are needed. A leading `*` on the very
    /// first frame switches the link to the Redis protocol for its
    /// lifetime.
    pub fn recv(&mut self) -> Result<Option<Request>> {
        if self.input.is_empty() {
            return Ok(None);
        }
        if self.redis.is_none() && self.input.as_slice()[0] == b'*' {
            self.redis = Some(RespAdapter::new());
        }
        // taken out and put back so the adapter can borrow the input buffer
        if let Some(mut adapter) = self.redis.take() {
            let parsed = adapter.parse_request(&mut self.input);
            self.redis = Some(adapter);
            return parsed;
        }

        match parse_frame(self.input.as_slice())? {
            None => Ok(None),
            Some((records, consumed)) => {
                self.input.consume(consumed);
                if records.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Request::from_records(records)))
                }
            }
        }
    }

    /// Append raw records as one frame, always in native framing.
    ///
    /// Replication and dump streams use this; those links never speak
    /// Redis.
    pub fn send(&mut self, records: &[&[u8]]) {
        for r in records {
            self.output.append_record(r);
        }
        self.output.end_frame();
    }

    /// Append a response frame, translated by the adapter when the link
    /// switched to the Redis protocol.
    pub fn send_resp(&mut self, resp: &Response) {
        if resp.is_empty() {
            return;
        }
        match &mut self.redis {
            Some(adapter) => adapter.encode_response(resp, &mut self.output),
            None => {
                for r in resp.records() {
                    self.output.append_record(r);
                }
                self.output.end_frame();
            }
        }
    }

    /// Send one request and block for the reply. Client-side helper.
    pub fn request(&mut self, records: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        self.send(records);
        self.flush()?;
        loop {
            if let Some(req) = self.recv()? {
                return Ok(req.into_records());
            }
            if self.read()? == 0 {
                return Err(Error::protocol("connection closed mid-reply"));
            }
        }
    }
}

/// Parse one frame: length-prefixed records terminated by an empty line.
///
/// Returns the records plus the bytes consumed, or `None` when the frame
/// is still incomplete.
fn parse_frame(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>> {
    let mut pos = 0;
    let mut records: Vec<Vec<u8>> = Vec::new();

    // ignore empty lines ahead of the first record
    while pos < buf.len() && records.is_empty() && (buf[pos] == b'\n' || buf[pos] == b'\r') {
        pos += 1;
    }

    loop {
        let nl = match buf[pos..].iter().position(|&b| b == b'\n') {
            None => return Ok(None),
            Some(i) => pos + i,
        };
        let mut head = &buf[pos..nl];
        if head.last() == Some(&b'\r') {
            head = &head[..head.len() - 1];
        }
        if head.is_empty() {
            return Ok(Some((records, nl + 1)));
        }
        if !head.iter().all(u8::is_ascii_digit) {
            warn!("bad frame header");
            return Err(Error::protocol("malformed record length"));
        }
        let len: usize = std::str::from_utf8(head)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::protocol("malformed record length"))?;
        if len > MAX_PACKET_SIZE {
            return Err(Error::protocol("record exceeds max packet size"));
        }

        let body_start = nl + 1;
        let body_end = body_start + len;
        if body_end > buf.len() {
            return Ok(None);
        }
        records.push(buf[body_start..body_end].to_vec());
        pos = body_end;

        // a record is followed by `\n` or `\r\n`
        if pos < buf.len() && buf[pos] == b'\n' {
            pos += 1;
        } else if pos + 1 < buf.len() && buf[pos] == b'\r' && buf[pos + 1] == b'\n' {
            pos += 2;
        } else if pos >= buf.len() || (buf[pos] == b'\r' && pos + 1 >= buf.len()) {
            return Ok(None);
        } else {
            return Err(Error::protocol("missing record separator"));
        }

        if pos > MAX_PACKET_SIZE {
            return Err(Error::protocol("frame exceeds max packet size"));
        }
    }
}

/// Enable TCP keepalive on a raw descriptor.
pub(crate) fn set_keepalive(fd: RawFd) {
    let opt: libc::c_int = 1;
    // best effort, matches the listener-side socket setup
    unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &opt as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_frame() {
        let (records, consumed) = parse_frame(b"3\nget\n3\nfoo\n\n").unwrap().unwrap();
        assert_eq!(records, vec![b"get".to_vec(), b"foo".to_vec()]);
        assert_eq!(consumed, 13);
    }

    #[test]
    fn test_parse_crlf_frame() {
        let (records, _) = parse_frame(b"4\r\nping\r\n\r\n").unwrap().unwrap();
        assert_eq!(records, vec![b"ping".to_vec()]);
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse_frame(b"3\nge").unwrap().is_none());
        assert!(parse_frame(b"3\nget\n").unwrap().is_none());
        assert!(parse_frame(b"10\nshort\n\n").unwrap().is_none());
        assert!(parse_frame(b"3\nget").unwrap().is_none());
    }

    #[test]
    fn test_parse_skips_leading_empty_lines() {
        let (records, consumed) = parse_frame(b"\n\r\n4\nping\n\n").unwrap().unwrap();
        assert_eq!(records, vec![b"ping".to_vec()]);
        assert_eq!(consumed, 11);
    }

    #[test]
    fn test_parse_binary_body() {
        let mut frame = Vec::new();
        frame.extend_from_slice(b"3\n");
        frame.extend_from_slice(&[0, 255, b'\n']);
        frame.extend_from_slice(b"\n\n");
        let (records, _) = parse_frame(&frame).unwrap().unwrap();
        assert_eq!(records, vec![vec![0u8, 255, b'\n']]);
    }

    #[test]
    fn test_parse_rejects_garbage_header() {
        assert!(parse_frame(b"x3\nfoo\n\n").is_err());
        assert!(parse_frame(b"-1\nfoo\n\n").is_err());
    }

    #[test]
    fn test_parse_rejects_oversized_record() {
        let huge = format!("{}\n", MAX_PACKET_SIZE + 1);
        assert!(parse_frame(huge.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_two_frames_consumes_only_first() {
        let buf = b"1\na\n\n1\nb\n\n";
        let (records, consumed) = parse_frame(buf).unwrap().unwrap();
        assert_eq!(records, vec![b"a".to_vec()]);
        let (records2, _) = parse_frame(&buf[consumed..]).unwrap().unwrap();
        assert_eq!(records2, vec![b"b".to_vec()]);
    }

    #[test]
    fn test_response_helpers() {
        let mut r = Response::new();
        r.reply_get(Some(b"bar".to_vec()));
        assert_eq!(r.records(), &[b"ok".to_vec(), b"bar".to_vec()]);

        let mut r = Response::new();
        r.reply_get(None);
        assert_eq!(r.status(), b"not_found");

        let mut r = Response::new();
        r.ok();
        r.push("partial");
        r.error("boom");
        assert_eq!(r.records()[0], b"error");
        assert_eq!(r.records().len(), 2);
    }

    #[test]
    fn test_request_accessors() {
        let req = Request::from_records(vec![b"set".to_vec(), b"k".to_vec(), b"v".to_vec()]);
        assert_eq!(req.cmd(), b"set");
        assert_eq!(req.rec(2), Some(&b"v"[..]));
        assert_eq!(req.rec(3), None);
        assert_eq!(req.records_from(1).len(), 2);
        assert_eq!(req.records_from(9).len(), 0);
    }
}
