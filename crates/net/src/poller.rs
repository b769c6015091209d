//! Thin readiness-multiplexer wrapper.
//!
//! The narrow surface (`register`, `reregister`, `deregister`, `wait`)
//! keeps the platform primitive isolated. Sockets stay `std::net` so a
//! link can be switched to blocking mode and moved to another thread; the
//! poller watches raw descriptors.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};

/// One readiness event.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    /// The registered token.
    pub token: usize,
    /// Input is readable.
    pub readable: bool,
    /// Output has space.
    pub writable: bool,
}

/// Readiness multiplexer over raw file descriptors.
pub struct Poller {
    poll: Poll,
    events: Events,
}

impl Poller {
    /// Create the poller.
    pub fn new() -> io::Result<Poller> {
        Ok(Poller {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
        })
    }

    /// Create a waker delivering `token` from other threads.
    pub fn create_waker(&self, token: usize) -> io::Result<Arc<Waker>> {
        Ok(Arc::new(Waker::new(self.poll.registry(), Token(token))?))
    }

    /// Subscribe a descriptor. At least one of the interests must be set.
    pub fn register(
        &self,
        fd: RawFd,
        token: usize,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(token), interest(readable, writable))
    }

    /// Replace a descriptor's subscription.
    pub fn reregister(
        &self,
        fd: RawFd,
        token: usize,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        self.poll.registry().reregister(
            &mut SourceFd(&fd),
            Token(token),
            interest(readable, writable),
        )
    }

    /// Drop a descriptor's subscription.
    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut SourceFd(&fd))
    }

    /// Wait for readiness up to `timeout`.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        Ok(self
            .events
            .iter()
            .map(|ev| Readiness {
                token: ev.token().0,
                readable: ev.is_readable() || ev.is_read_closed(),
                writable: ev.is_writable(),
            })
            .collect())
    }
}

fn interest(readable: bool, writable: bool) -> Interest {
    match (readable, writable) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (false, true) => Interest::WRITABLE,
        // a subscription with no interest is a caller bug; default to read
        _ => Interest::READABLE,
    }
}
