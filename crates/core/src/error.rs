//! Error types for kitedb.
//!
//! One unified error enum is shared by every crate in the workspace. The
//! engine surfaces `Storage`, the codec surfaces `Corruption`, the wire
//! layer surfaces `Protocol`, and the typed operations surface the
//! remaining variants. `thiserror` provides `Display` and `Error`.

use std::io;
use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for kitedb operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying engine failed a read or an atomic batch write.
    #[error("storage error: {message}")]
    Storage {
        /// What the engine reported
        message: String,
    },

    /// A stored record or an encoded key failed to decode.
    #[error("corruption: {message}")]
    Corruption {
        /// What failed to decode
        message: String,
    },

    /// The caller supplied an argument the operation cannot accept.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Which argument and why
        message: String,
    },

    /// A queue push would leave the item sequence window.
    #[error("queue is full: seq {seq} out of range")]
    QueueFull {
        /// The sequence that fell outside the item window
        seq: u64,
    },

    /// A malformed frame or an oversized packet arrived on the wire.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was wrong with the frame
        message: String,
    },

    /// I/O error from a socket or the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Create a `Storage` error.
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Create a `Corruption` error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption {
            message: message.into(),
        }
    }

    /// Create an `InvalidInput` error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    /// True for errors that originate below the typed layer.
    ///
    /// Replication treats these as fatal for the current connection; a
    /// malformed record (`Corruption`) is logged and skipped instead.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage { .. } | Error::Io(_))
    }

    /// True when the caller's input was rejected before touching storage.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_storage() {
        let e = Error::storage("write failed");
        assert!(e.to_string().contains("storage error"));
        assert!(e.to_string().contains("write failed"));
    }

    #[test]
    fn test_display_corruption() {
        let e = Error::corruption("short zscore key");
        assert!(e.to_string().contains("corruption"));
    }

    #[test]
    fn test_display_queue_full() {
        let e = Error::QueueFull { seq: 42 };
        assert!(e.to_string().contains("42"));
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.is_storage());
    }

    #[test]
    fn test_classifiers() {
        assert!(Error::storage("x").is_storage());
        assert!(!Error::storage("x").is_client_error());
        assert!(Error::invalid_input("bad arity").is_client_error());
        assert!(!Error::QueueFull { seq: 1 }.is_storage());
    }
}
