//! Type tags and binlog constants.
//!
//! Every engine key starts with a one-byte tag from [`tag`]. The tag values
//! are chosen so that one forward scan over `[MIN_PREFIX, MAX_PREFIX]`
//! visits every user datum exactly once; size counters and the binlog sort
//! outside that window.

/// One-byte engine key prefixes.
pub mod tag {
    /// Binlog records. Sorts before every user tag.
    pub const BINLOG: u8 = 1;
    /// Hash size counter.
    pub const HSIZE: u8 = b'H';
    /// Queue size counter.
    pub const QSIZE: u8 = b'Q';
    /// Sorted-set size counter.
    pub const ZSIZE: u8 = b'Z';
    /// Hash field entry.
    pub const HASH: u8 = b'h';
    /// Plain key-value entry.
    pub const KV: u8 = b'k';
    /// Queue item entry.
    pub const QUEUE: u8 = b'q';
    /// Sorted-set member entry (key -> score).
    pub const ZSET: u8 = b's';
    /// Sorted-set by-score index entry (empty value).
    pub const ZSCORE: u8 = b'z';

    /// Lowest tag holding user data.
    pub const MIN_PREFIX: u8 = HASH;
    /// Highest tag holding user data.
    pub const MAX_PREFIX: u8 = ZSCORE;
}

/// Replication class of a binlog record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogType {
    /// Heartbeat; carries a sequence but no mutation.
    Noop = 0,
    /// Local write on a primary; forwarded to replicas.
    Sync = 1,
    /// Write applied from a mirror peer; never re-forwarded to mirrors.
    Mirror = 2,
    /// Snapshot-phase record synthesized during COPY.
    Copy = 3,
}

impl LogType {
    /// Decode a wire byte.
    pub fn from_u8(v: u8) -> Option<LogType> {
        match v {
            0 => Some(LogType::Noop),
            1 => Some(LogType::Sync),
            2 => Some(LogType::Mirror),
            3 => Some(LogType::Copy),
            _ => None,
        }
    }

    /// Wire byte for this type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Operation recorded by a binlog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogCommand {
    /// No operation (heartbeats).
    None = 0,
    /// KV set.
    KSet = 1,
    /// KV delete.
    KDel = 2,
    /// Hash field set.
    HSet = 3,
    /// Hash field delete.
    HDel = 4,
    /// Sorted-set member set.
    ZSet = 5,
    /// Sorted-set member delete.
    ZDel = 6,
    /// COPY phase started.
    Begin = 7,
    /// COPY phase finished.
    End = 8,
    /// Queue item overwritten in place.
    QSet = 9,
    /// Queue push at the tail.
    QPushBack = 10,
    /// Queue push at the head.
    QPushFront = 11,
    /// Queue pop at the tail.
    QPopBack = 12,
    /// Queue pop at the head.
    QPopFront = 13,
}

impl LogCommand {
    /// Decode a wire byte.
    pub fn from_u8(v: u8) -> Option<LogCommand> {
        use LogCommand::*;
        match v {
            0 => Some(None),
            1 => Some(KSet),
            2 => Some(KDel),
            3 => Some(HSet),
            4 => Some(HDel),
            5 => Some(ZSet),
            6 => Some(ZDel),
            7 => Some(Begin),
            8 => Some(End),
            9 => Some(QSet),
            10 => Some(QPushBack),
            11 => Some(QPushFront),
            12 => Some(QPopBack),
            13 => Some(QPopFront),
            _ => Option::None,
        }
    }

    /// Wire byte for this command.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Commands whose replication frame carries the current value.
    pub fn carries_value(self) -> bool {
        use LogCommand::*;
        matches!(self, KSet | HSet | ZSet | QSet | QPushBack | QPushFront)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_window_covers_user_data_only() {
        for t in [tag::HASH, tag::KV, tag::QUEUE, tag::ZSET, tag::ZSCORE] {
            assert!(t >= tag::MIN_PREFIX && t <= tag::MAX_PREFIX);
        }
        for t in [tag::BINLOG, tag::HSIZE, tag::QSIZE, tag::ZSIZE] {
            assert!(t < tag::MIN_PREFIX);
        }
    }

    #[test]
    fn test_log_type_roundtrip() {
        for t in [LogType::Noop, LogType::Sync, LogType::Mirror, LogType::Copy] {
            assert_eq!(LogType::from_u8(t.as_u8()), Some(t));
        }
        assert_eq!(LogType::from_u8(200), None);
    }

    #[test]
    fn test_log_command_roundtrip() {
        for v in 0..=13u8 {
            let cmd = LogCommand::from_u8(v).unwrap();
            assert_eq!(cmd.as_u8(), v);
        }
        assert_eq!(LogCommand::from_u8(99), None);
    }

    #[test]
    fn test_carries_value() {
        assert!(LogCommand::KSet.carries_value());
        assert!(LogCommand::QPushFront.carries_value());
        assert!(!LogCommand::KDel.carries_value());
        assert!(!LogCommand::QPopBack.carries_value());
        assert!(!LogCommand::Begin.carries_value());
    }
}
