//! Growable stream buffer with a consume cursor.

/// Byte buffer for one direction of a link.
///
/// Appends go at the tail; `consume` advances the head. The dead prefix is
/// compacted once it grows past a threshold so long-lived links do not
/// accumulate memory.
#[derive(Default)]
pub struct Buffer {
    data: Vec<u8>,
    start: usize,
}

const COMPACT_THRESHOLD: usize = 8 * 1024;

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Buffer {
        Buffer::default()
    }

    /// Bytes currently readable.
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    /// True when nothing is readable.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The readable bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Drop `n` bytes from the head.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.start += n;
        if self.start >= self.data.len() {
            self.data.clear();
            self.start = 0;
        } else if self.start > COMPACT_THRESHOLD {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }

    /// Append raw bytes at the tail.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append one length-prefixed record: `<len>\n<bytes>\n`.
    pub fn append_record(&mut self, record: &[u8]) {
        self.append(record.len().to_string().as_bytes());
        self.data.push(b'\n');
        self.append(record);
        self.data.push(b'\n');
    }

    /// Append the frame terminator (a bare newline).
    pub fn end_frame(&mut self) {
        self.data.push(b'\n');
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.data.clear();
        self.start = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_consume() {
        let mut b = Buffer::new();
        b.append(b"hello");
        assert_eq!(b.as_slice(), b"hello");
        b.consume(2);
        assert_eq!(b.as_slice(), b"llo");
        b.consume(3);
        assert!(b.is_empty());
    }

    #[test]
    fn test_append_record_framing() {
        let mut b = Buffer::new();
        b.append_record(b"get");
        b.append_record(b"foo");
        b.end_frame();
        assert_eq!(b.as_slice(), b"3\nget\n3\nfoo\n\n");
    }

    #[test]
    fn test_compaction_keeps_content() {
        let mut b = Buffer::new();
        let chunk = vec![0xABu8; 1024];
        for _ in 0..20 {
            b.append(&chunk);
        }
        b.consume(10 * 1024);
        b.append(b"tail");
        assert_eq!(b.len(), 10 * 1024 + 4);
        assert_eq!(&b.as_slice()[10 * 1024..], b"tail");
    }
}
