//! Deterministic byte layouts for engine keys.
//!
//! Every key starts with a one-byte tag from [`crate::consts::tag`]. Names
//! are prefixed with a single length byte, so they are limited to 255
//! bytes. All integers embedded in keys are big-endian so that the
//! engine's lexical order equals numeric order.
//!
//! Sorted-set scores get one extra byte: `'-'` for negative scores and
//! `'='` otherwise. Within each sign group the big-endian two's-complement
//! bit pattern is already monotonic, and `'-' < '='`, so the full encoding
//! compares lexically in signed numeric order.

use byteorder::{BigEndian, ByteOrder};

use crate::consts::tag;
use crate::error::{Error, Result};

/// Cursor over an encoded key.
struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder { buf }
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        if self.buf.len() < n {
            return Err(Error::corruption("truncated key"));
        }
        self.buf = &self.buf[n..];
        Ok(())
    }

    fn expect_tag(&mut self, t: u8) -> Result<()> {
        if self.buf.first() != Some(&t) {
            return Err(Error::corruption("wrong type tag"));
        }
        self.skip(1)
    }

    /// Read a length-byte-prefixed field.
    fn read_len8(&mut self) -> Result<&'a [u8]> {
        let len = *self
            .buf
            .first()
            .ok_or_else(|| Error::corruption("missing length byte"))? as usize;
        if self.buf.len() < 1 + len {
            return Err(Error::corruption("truncated length-prefixed field"));
        }
        let out = &self.buf[1..1 + len];
        self.buf = &self.buf[1 + len..];
        Ok(out)
    }

    fn read_u64(&mut self) -> Result<u64> {
        if self.buf.len() < 8 {
            return Err(Error::corruption("truncated u64 field"));
        }
        let v = BigEndian::read_u64(&self.buf[..8]);
        self.buf = &self.buf[8..];
        Ok(v)
    }

    /// Consume the rest of the key.
    fn rest(&mut self) -> &'a [u8] {
        let out = self.buf;
        self.buf = &self.buf[self.buf.len()..];
        out
    }
}

fn push_len8(buf: &mut Vec<u8>, field: &[u8]) {
    debug_assert!(field.len() <= u8::MAX as usize);
    buf.push(field.len() as u8);
    buf.extend_from_slice(field);
}

fn push_u64(buf: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    BigEndian::write_u64(&mut b, v);
    buf.extend_from_slice(&b);
}

/* KV */

pub fn encode_kv_key(key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + key.len());
    buf.push(tag::KV);
    buf.extend_from_slice(key);
    buf
}

pub fn decode_kv_key(buf: &[u8]) -> Result<Vec<u8>> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::KV)?;
    Ok(d.rest().to_vec())
}

/* HASH */

pub fn encode_hsize_key(name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + name.len());
    buf.push(tag::HSIZE);
    buf.extend_from_slice(name);
    buf
}

pub fn decode_hsize_key(buf: &[u8]) -> Result<Vec<u8>> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::HSIZE)?;
    Ok(d.rest().to_vec())
}

pub fn encode_hash_key(name: &[u8], field: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + name.len() + field.len());
    buf.push(tag::HASH);
    push_len8(&mut buf, name);
    buf.push(b'=');
    buf.extend_from_slice(field);
    buf
}

pub fn decode_hash_key(buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::HASH)?;
    let name = d.read_len8()?.to_vec();
    d.skip(1)?;
    Ok((name, d.rest().to_vec()))
}

/* ZSET */

pub fn encode_zsize_key(name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + name.len());
    buf.push(tag::ZSIZE);
    buf.extend_from_slice(name);
    buf
}

pub fn decode_zsize_key(buf: &[u8]) -> Result<Vec<u8>> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::ZSIZE)?;
    Ok(d.rest().to_vec())
}

pub fn encode_zset_key(name: &[u8], key: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(3 + name.len() + key.len());
    buf.push(tag::ZSET);
    push_len8(&mut buf, name);
    push_len8(&mut buf, key);
    buf
}

pub fn decode_zset_key(buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::ZSET)?;
    let name = d.read_len8()?.to_vec();
    let key = d.read_len8()?.to_vec();
    Ok((name, key))
}

pub fn encode_zscore_key(name: &[u8], key: &[u8], score: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + name.len() + key.len());
    buf.push(tag::ZSCORE);
    push_len8(&mut buf, name);
    buf.push(if score < 0 { b'-' } else { b'=' });
    push_u64(&mut buf, score as u64);
    buf.push(b'=');
    buf.extend_from_slice(key);
    buf
}

/// Returns `(name, key, score)`.
pub fn decode_zscore_key(buf: &[u8]) -> Result<(Vec<u8>, Vec<u8>, i64)> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::ZSCORE)?;
    let name = d.read_len8()?.to_vec();
    d.skip(1)?;
    let score = d.read_u64()? as i64;
    d.skip(1)?;
    Ok((name, d.rest().to_vec(), score))
}

/* QUEUE */

pub fn encode_qsize_key(name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + name.len());
    buf.push(tag::QSIZE);
    buf.extend_from_slice(name);
    buf
}

pub fn decode_qsize_key(buf: &[u8]) -> Result<Vec<u8>> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::QSIZE)?;
    Ok(d.rest().to_vec())
}

pub fn encode_qitem_key(name: &[u8], seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + name.len());
    buf.push(tag::QUEUE);
    push_len8(&mut buf, name);
    push_u64(&mut buf, seq);
    buf
}

/// Returns `(name, seq)`.
pub fn decode_qitem_key(buf: &[u8]) -> Result<(Vec<u8>, u64)> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::QUEUE)?;
    let name = d.read_len8()?.to_vec();
    let seq = d.read_u64()?;
    Ok((name, seq))
}

/* BINLOG */

pub fn encode_binlog_key(seq: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    buf.push(tag::BINLOG);
    push_u64(&mut buf, seq);
    buf
}

pub fn decode_binlog_key(buf: &[u8]) -> Result<u64> {
    let mut d = Decoder::new(buf);
    d.expect_tag(tag::BINLOG)?;
    d.read_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_kv_roundtrip() {
        let k = encode_kv_key(b"foo");
        assert_eq!(k[0], tag::KV);
        assert_eq!(decode_kv_key(&k).unwrap(), b"foo");
    }

    #[test]
    fn test_hash_roundtrip() {
        let k = encode_hash_key(b"profile", b"email");
        let (name, field) = decode_hash_key(&k).unwrap();
        assert_eq!(name, b"profile");
        assert_eq!(field, b"email");
    }

    #[test]
    fn test_hsize_roundtrip() {
        let k = encode_hsize_key(b"profile");
        assert_eq!(decode_hsize_key(&k).unwrap(), b"profile");
    }

    #[test]
    fn test_zset_roundtrip() {
        let k = encode_zset_key(b"board", b"alice");
        let (name, key) = decode_zset_key(&k).unwrap();
        assert_eq!(name, b"board");
        assert_eq!(key, b"alice");
    }

    #[test]
    fn test_zscore_roundtrip() {
        for score in [i64::MIN, -100, -1, 0, 1, 50, i64::MAX] {
            let k = encode_zscore_key(b"board", b"alice", score);
            let (name, key, s) = decode_zscore_key(&k).unwrap();
            assert_eq!(name, b"board");
            assert_eq!(key, b"alice");
            assert_eq!(s, score);
        }
    }

    #[test]
    fn test_zscore_sign_byte() {
        let neg = encode_zscore_key(b"n", b"k", -5);
        let pos = encode_zscore_key(b"n", b"k", 5);
        assert_eq!(neg[3], b'-');
        assert_eq!(pos[3], b'=');
    }

    #[test]
    fn test_qitem_roundtrip() {
        let k = encode_qitem_key(b"jobs", 10_500);
        let (name, seq) = decode_qitem_key(&k).unwrap();
        assert_eq!(name, b"jobs");
        assert_eq!(seq, 10_500);
    }

    #[test]
    fn test_binlog_roundtrip() {
        let k = encode_binlog_key(77);
        assert_eq!(decode_binlog_key(&k).unwrap(), 77);
    }

    #[test]
    fn test_decode_rejects_wrong_tag() {
        let k = encode_kv_key(b"foo");
        assert!(decode_hash_key(&k).is_err());
        assert!(decode_qitem_key(&k).is_err());
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let k = encode_zscore_key(b"board", b"alice", 10);
        assert!(decode_zscore_key(&k[..4]).is_err());
        let q = encode_qitem_key(b"jobs", 1);
        assert!(decode_qitem_key(&q[..q.len() - 1]).is_err());
    }

    #[test]
    fn test_empty_name_and_key_still_encode() {
        let (name, key) = decode_zset_key(&encode_zset_key(b"", b"")).unwrap();
        assert!(name.is_empty());
        assert!(key.is_empty());
    }

    proptest! {
        #[test]
        fn prop_hash_roundtrip(name in proptest::collection::vec(any::<u8>(), 0..=255),
                               field in proptest::collection::vec(any::<u8>(), 0..64)) {
            let k = encode_hash_key(&name, &field);
            let (n, f) = decode_hash_key(&k).unwrap();
            prop_assert_eq!(n, name);
            prop_assert_eq!(f, field);
        }

        #[test]
        fn prop_zscore_roundtrip(name in proptest::collection::vec(any::<u8>(), 0..=255),
                                 key in proptest::collection::vec(any::<u8>(), 0..64),
                                 score in any::<i64>()) {
            let k = encode_zscore_key(&name, &key, score);
            let (n, kk, s) = decode_zscore_key(&k).unwrap();
            prop_assert_eq!(n, name);
            prop_assert_eq!(kk, key);
            prop_assert_eq!(s, score);
        }

        #[test]
        fn prop_zscore_lexical_order_matches_numeric(s1 in any::<i64>(), s2 in any::<i64>()) {
            let k1 = encode_zscore_key(b"name", b"key", s1);
            let k2 = encode_zscore_key(b"name", b"key", s2);
            prop_assert_eq!(s1.cmp(&s2), k1.cmp(&k2));
        }

        #[test]
        fn prop_qitem_lexical_order_matches_numeric(s1 in any::<u64>(), s2 in any::<u64>()) {
            let k1 = encode_qitem_key(b"q", s1);
            let k2 = encode_qitem_key(b"q", s2);
            prop_assert_eq!(s1.cmp(&s2), k1.cmp(&k2));
        }

        #[test]
        fn prop_binlog_lexical_order_matches_numeric(s1 in any::<u64>(), s2 in any::<u64>()) {
            let k1 = encode_binlog_key(s1);
            let k2 = encode_binlog_key(s2);
            prop_assert_eq!(s1.cmp(&s2), k1.cmp(&k2));
        }
    }
}
