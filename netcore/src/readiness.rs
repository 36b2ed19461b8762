use std::io;
use std::time::Duration;

use mio::unix::EventedFd;
use mio::{Events, Poll, PollOpt, Ready, Token};

use crate::error::CoreError;
use crate::sock::SocketDescriptor;

/// Which direction(s) of I/O a connection wants to be woken up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };

    fn to_ready(self) -> Ready {
        let mut ready = Ready::empty();
        if self.readable {
            ready |= Ready::readable();
        }
        if self.writable {
            ready |= Ready::writable();
        }
        ready
    }
}

/// Abstraction over the platform readiness primitive, hiding the `poll(2)` vs.
/// `select(2)` vs. IOCP branching that `selpoll_init`/`selpoll_fd_set` in
/// `net_server.c` used to do with `#ifdef WIN32`. This crate has exactly one
/// implementation ([`MioReadiness`]), but keeping the trait lets `Core` stay
/// agnostic of it, matching REDESIGN FLAG §9's call to hide platform
/// branching behind a single interface rather than scattering `#[cfg]`s.
///
/// Interest is always registered level-triggered: a socket that isn't fully
/// drained in one `run_one` call stays ready on the next one, rather than
/// requiring the caller to re-arm it (the original's `poll()`/`select()` loop
/// is level-triggered too).
pub trait Readiness {
    fn arm(&mut self, sock: SocketDescriptor, interest: Interest) -> io::Result<()>;
    fn disarm(&mut self, sock: SocketDescriptor) -> io::Result<()>;
    /// Blocks for up to `timeout` (or indefinitely if `None`), returning the
    /// sockets that became ready, in ascending order, matching the original's
    /// ascending-index dispatch in `wait_request`.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<SocketDescriptor>>;
}

pub struct MioReadiness {
    poll: Poll,
    events: Events,
    capacity: usize,
}

impl MioReadiness {
    pub fn new(capacity: usize) -> Result<Self, CoreError> {
        let poll = Poll::new().map_err(CoreError::ReadinessInit)?;
        Ok(MioReadiness {
            poll,
            events: Events::with_capacity(capacity),
            capacity,
        })
    }
}

impl Readiness for MioReadiness {
    fn arm(&mut self, sock: SocketDescriptor, interest: Interest) -> io::Result<()> {
        let raw = sock.raw();
        let token = Token(raw as usize);
        let evented = EventedFd(&raw);
        // re-register is idempotent for a socket we're updating interest on;
        // register fails if it's already registered, so try that first.
        match self.poll.register(&evented, token, interest.to_ready(), PollOpt::level()) {
            Ok(()) => Ok(()),
            Err(_) => self.poll.reregister(&evented, token, interest.to_ready(), PollOpt::level()),
        }
    }

    fn disarm(&mut self, sock: SocketDescriptor) -> io::Result<()> {
        let raw = sock.raw();
        let evented = EventedFd(&raw);
        self.poll.deregister(&evented)
    }

    /// Ready sockets are sorted by the same `sock mod capacity` bucket the
    /// connection table itself probes from, not by raw descriptor value: the
    /// ascending order the dispatch loop needs is slot-index order
    /// (spec.md §4.F, `wait_request`'s `for` loop over the connection
    /// table), and a bucket can collide across descriptors the same way the
    /// table's own linear probing does, so this is an approximation of true
    /// slot order rather than an exact match when two ready sockets share a
    /// bucket.
    fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<SocketDescriptor>> {
        self.poll.poll(&mut self.events, timeout)?;
        let mut ready: Vec<SocketDescriptor> = self
            .events
            .iter()
            .map(|event| SocketDescriptor::new(event.token().0 as std::os::unix::io::RawFd))
            .collect();
        ready.sort_by_key(|sock| sock.bucket(self.capacity));
        ready.dedup();
        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_to_ready_combines_flags() {
        assert_eq!(Interest::BOTH.to_ready(), Ready::readable() | Ready::writable());
    }
}
