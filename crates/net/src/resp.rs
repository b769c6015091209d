//! Redis protocol (RESP) adapter.
//!
//! A link whose first incoming byte is `*` switches to RESP for its
//! lifetime. The adapter parses RESP arrays into native requests,
//! translates a subset of the Redis command vocabulary, and renders
//! native responses back into RESP by a per-command reply-type table.

use kite_core::limits::MAX_PACKET_SIZE;
use kite_core::{Error, Result};

use crate::buffer::Buffer;
use crate::link::{Request, Response};

/// How the reply of the last translated command renders in RESP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyType {
    /// `+OK`
    Status,
    /// `:<n>`
    Int,
    /// `$<len>` / `$-1`
    Bulk,
    /// `*<n>` of bulks
    MultiBulk,
}

/// Sticky per-link RESP translation state.
pub struct RespAdapter {
    last_reply: ReplyType,
}

impl RespAdapter {
    /// Fresh adapter; installed on the first `*` byte.
    pub fn new() -> RespAdapter {
        RespAdapter {
            last_reply: ReplyType::Status,
        }
    }

    /// Parse one RESP array out of `input` and translate the command.
    pub fn parse_request(&mut self, input: &mut Buffer) -> Result<Option<Request>> {
        match parse_resp(input.as_slice())? {
            None => Ok(None),
            Some((records, consumed)) => {
                input.consume(consumed);
                if records.is_empty() {
                    return Ok(None);
                }
                Ok(Some(self.translate(records)))
            }
        }
    }

    fn translate(&mut self, mut records: Vec<Vec<u8>>) -> Request {
        records[0].make_ascii_lowercase();
        let cmd = records[0].clone();
        // argument reorders first
        match cmd.as_slice() {
            // ZADD key score member -> zset name key score
            b"zadd" if records.len() >= 4 => records.swap(2, 3),
            // ZINCRBY key incr member -> zincr name key by
            b"zincrby" if records.len() >= 4 => records.swap(2, 3),
            _ => {}
        }
        let (native, reply): (&str, ReplyType) = match cmd.as_slice() {
            b"ping" => ("ping", ReplyType::Status),
            b"auth" => ("auth", ReplyType::Status),
            b"select" => ("ping", ReplyType::Status),
            b"info" => ("info", ReplyType::MultiBulk),

            b"get" => ("get", ReplyType::Bulk),
            b"set" => ("set", ReplyType::Status),
            b"setnx" => ("setnx", ReplyType::Int),
            b"getset" => ("getset", ReplyType::Bulk),
            b"del" => ("multi_del", ReplyType::Int),
            b"exists" => ("exists", ReplyType::Int),
            b"incr" | b"incrby" => ("incr", ReplyType::Int),
            b"decr" | b"decrby" => ("decr", ReplyType::Int),
            b"mget" => ("multi_get", ReplyType::MultiBulk),
            b"mset" => ("multi_set", ReplyType::Status),
            b"setbit" => ("setbit", ReplyType::Int),
            b"getbit" => ("getbit", ReplyType::Int),

            b"hget" => ("hget", ReplyType::Bulk),
            b"hset" => ("hset", ReplyType::Int),
            b"hdel" => ("hdel", ReplyType::Int),
            b"hlen" => ("hsize", ReplyType::Int),
            b"hgetall" => ("hgetall", ReplyType::MultiBulk),
            b"hincrby" => ("hincr", ReplyType::Int),
            b"hexists" => ("hexists", ReplyType::Int),

            b"zadd" => ("zset", ReplyType::Int),
            b"zrem" => ("zdel", ReplyType::Int),
            b"zscore" => ("zget", ReplyType::Bulk),
            b"zcard" => ("zsize", ReplyType::Int),
            b"zincrby" => ("zincr", ReplyType::Int),
            b"zrank" => ("zrank", ReplyType::Int),
            b"zrevrank" => ("zrrank", ReplyType::Int),

            b"lpush" => ("qpush_front", ReplyType::Int),
            b"rpush" => ("qpush_back", ReplyType::Int),
            b"lpop" => ("qpop_front", ReplyType::Bulk),
            b"rpop" => ("qpop_back", ReplyType::Bulk),
            b"llen" => ("qsize", ReplyType::Int),
            b"lindex" => ("qget", ReplyType::Bulk),
            b"lset" => ("qset", ReplyType::Status),
            b"lrange" => ("qslice", ReplyType::MultiBulk),

            _ => {
                self.last_reply = ReplyType::Status;
                return Request::from_records(records);
            }
        };
        self.last_reply = reply;
        records[0] = native.as_bytes().to_vec();
        Request::from_records(records)
    }

    /// Render a native response frame into RESP.
    pub fn encode_response(&mut self, resp: &Response, output: &mut Buffer) {
        let records = resp.records();
        match resp.status() {
            b"ok" => match self.last_reply {
                ReplyType::Status => output.append(b"+OK\r\n"),
                ReplyType::Int => {
                    output.append(b":");
                    output.append(records.get(1).map(Vec::as_slice).unwrap_or(b"0"));
                    output.append(b"\r\n");
                }
                ReplyType::Bulk => match records.get(1) {
                    Some(v) => append_bulk(output, v),
                    None => output.append(b"$-1\r\n"),
                },
                ReplyType::MultiBulk => {
                    let items = &records[1..];
                    output.append(format!("*{}\r\n", items.len()).as_bytes());
                    for item in items {
                        append_bulk(output, item);
                    }
                }
            },
            b"not_found" => match self.last_reply {
                ReplyType::Int => output.append(b":0\r\n"),
                ReplyType::MultiBulk => output.append(b"*0\r\n"),
                _ => output.append(b"$-1\r\n"),
            },
            b"noauth" => output.append(b"-NOAUTH authentication required\r\n"),
            b"out_of_range" => output.append(b"-ERR key out of range\r\n"),
            _ => {
                output.append(b"-ERR ");
                output.append(records.get(1).map(Vec::as_slice).unwrap_or(b"error"));
                output.append(b"\r\n");
            }
        }
    }
}

impl Default for RespAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn append_bulk(output: &mut Buffer, value: &[u8]) {
    output.append(format!("${}\r\n", value.len()).as_bytes());
    output.append(value);
    output.append(b"\r\n");
}

/// Parse `*N\r\n($len\r\n<bytes>\r\n){N}`; `None` when incomplete.
fn parse_resp(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>> {
    let mut pos = 0;
    let count = match parse_prefixed_int(buf, &mut pos, b'*')? {
        None => return Ok(None),
        Some(n) => n,
    };
    if count < 0 || count > 1024 * 1024 {
        return Err(Error::protocol("bad RESP array length"));
    }
    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = match parse_prefixed_int(buf, &mut pos, b'$')? {
            None => return Ok(None),
            Some(n) => n,
        };
        if len < 0 || len as usize > MAX_PACKET_SIZE {
            return Err(Error::protocol("bad RESP bulk length"));
        }
        let end = pos + len as usize;
        if end + 2 > buf.len() {
            return Ok(None);
        }
        records.push(buf[pos..end].to_vec());
        if &buf[end..end + 2] != b"\r\n" {
            return Err(Error::protocol("missing RESP bulk terminator"));
        }
        pos = end + 2;
    }
    Ok(Some((records, pos)))
}

fn parse_prefixed_int(buf: &[u8], pos: &mut usize, prefix: u8) -> Result<Option<i64>> {
    if *pos >= buf.len() {
        return Ok(None);
    }
    if buf[*pos] != prefix {
        return Err(Error::protocol("unexpected RESP prefix"));
    }
    let line_start = *pos + 1;
    let nl = match buf[line_start..].iter().position(|&b| b == b'\n') {
        None => return Ok(None),
        Some(i) => line_start + i,
    };
    let mut digits = &buf[line_start..nl];
    if digits.last() == Some(&b'\r') {
        digits = &digits[..digits.len() - 1];
    }
    let v = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::protocol("malformed RESP integer"))?;
    *pos = nl + 1;
    Ok(Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(bytes: &[u8]) -> Option<Request> {
        let mut adapter = RespAdapter::new();
        let mut buf = Buffer::new();
        buf.append(bytes);
        adapter.parse_request(&mut buf).unwrap()
    }

    #[test]
    fn test_parse_simple_command() {
        let req = parse_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").unwrap();
        assert_eq!(req.cmd(), b"get");
        assert_eq!(req.rec(1), Some(&b"foo"[..]));
    }

    #[test]
    fn test_parse_incomplete() {
        let mut adapter = RespAdapter::new();
        let mut buf = Buffer::new();
        buf.append(b"*2\r\n$3\r\nGET\r\n$3\r\nfo");
        assert!(adapter.parse_request(&mut buf).unwrap().is_none());
        // nothing consumed yet
        assert_eq!(buf.len(), 19);
        buf.append(b"o\r\n");
        assert!(adapter.parse_request(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_zadd_reorders_args() {
        let req = parse_all(b"*4\r\n$4\r\nZADD\r\n$1\r\ns\r\n$3\r\n100\r\n$5\r\nalice\r\n").unwrap();
        assert_eq!(req.cmd(), b"zset");
        assert_eq!(req.rec(1), Some(&b"s"[..]));
        assert_eq!(req.rec(2), Some(&b"alice"[..]));
        assert_eq!(req.rec(3), Some(&b"100"[..]));
    }

    #[test]
    fn test_del_maps_to_multi_del() {
        let req = parse_all(b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n").unwrap();
        assert_eq!(req.cmd(), b"multi_del");
    }

    #[test]
    fn test_encode_bulk_reply() {
        let mut adapter = RespAdapter::new();
        let mut buf = Buffer::new();
        buf.append(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n");
        adapter.parse_request(&mut buf).unwrap().unwrap();

        let mut resp = Response::new();
        resp.reply_get(Some(b"bar".to_vec()));
        let mut out = Buffer::new();
        adapter.encode_response(&resp, &mut out);
        assert_eq!(out.as_slice(), b"$3\r\nbar\r\n");

        let mut resp = Response::new();
        resp.reply_get(None);
        let mut out = Buffer::new();
        adapter.encode_response(&resp, &mut out);
        assert_eq!(out.as_slice(), b"$-1\r\n");
    }

    #[test]
    fn test_encode_int_and_status() {
        let mut adapter = RespAdapter::new();
        let mut buf = Buffer::new();
        buf.append(b"*2\r\n$4\r\nLLEN\r\n$1\r\nq\r\n");
        adapter.parse_request(&mut buf).unwrap().unwrap();
        let mut resp = Response::new();
        resp.reply_int(2);
        let mut out = Buffer::new();
        adapter.encode_response(&resp, &mut out);
        assert_eq!(out.as_slice(), b":2\r\n");

        let mut buf = Buffer::new();
        buf.append(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        adapter.parse_request(&mut buf).unwrap().unwrap();
        let mut resp = Response::new();
        resp.ok();
        let mut out = Buffer::new();
        adapter.encode_response(&resp, &mut out);
        assert_eq!(out.as_slice(), b"+OK\r\n");
    }

    #[test]
    fn test_encode_error() {
        let mut adapter = RespAdapter::new();
        let mut resp = Response::new();
        resp.error("boom");
        let mut out = Buffer::new();
        adapter.encode_response(&resp, &mut out);
        assert_eq!(out.as_slice(), b"-ERR boom\r\n");
    }

    #[test]
    fn test_parse_rejects_bad_prefix() {
        let mut adapter = RespAdapter::new();
        let mut buf = Buffer::new();
        buf.append(b"*1\r\n:5\r\n");
        assert!(adapter.parse_request(&mut buf).is_err());
    }
}
