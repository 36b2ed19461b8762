use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::TableError;
use crate::sock::SocketDescriptor;

/// What role a connection plays, mirroring the distinct close/authentication
/// paths `net_server.c` takes depending on connection type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    PrimaryListener,
    SecondaryListener,
    FromClient,
    ChildPipe,
    ReliableDatagram,
    Idle,
}

/// Per-connection authentication and lifecycle bits, corresponding to the
/// flag bits `net_server.c` keeps alongside `cn_sock` (`PBS_NET_CONN_FROM_PRIVIL`,
/// `PBS_NET_CONN_AUTHENTICATED`, `PBS_NET_CONN_NOTIMEOUT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthFlags(u32);

impl AuthFlags {
    pub const NONE: AuthFlags = AuthFlags(0);
    pub const FROM_PRIVILEGED_PORT: AuthFlags = AuthFlags(1 << 0);
    pub const AUTHENTICATED: AuthFlags = AuthFlags(1 << 1);
    pub const NO_TIMEOUT: AuthFlags = AuthFlags(1 << 2);

    pub fn contains(self, other: AuthFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AuthFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: AuthFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for AuthFlags {
    type Output = AuthFlags;
    fn bitor(self, rhs: AuthFlags) -> AuthFlags {
        AuthFlags(self.0 | rhs.0)
    }
}

/// A single entry in the connection table.
#[derive(Debug, Clone)]
pub struct Connection {
    pub sock: SocketDescriptor,
    pub kind: ConnectionKind,
    pub auth: AuthFlags,
    pub peer_addr: Option<SocketAddr>,
    pub last_active: Instant,
}

impl Connection {
    pub fn new(sock: SocketDescriptor, kind: ConnectionKind, peer_addr: Option<SocketAddr>) -> Self {
        Connection {
            sock,
            kind,
            auth: AuthFlags::NONE,
            peer_addr,
            last_active: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }
}

/// Fixed-capacity, open-addressed connection table.
///
/// Slots are indexed by `sock.bucket(capacity)` with linear probing on
/// collision, mirroring `connection_find_usable_index`/`connection_find_actual_index`
/// in `net_server.c`: both functions scan the full table starting from the
/// hash bucket rather than stopping at the first empty slot, which is what
/// lets lookups keep working correctly after a slot in the middle of a probe
/// run has been released.
pub struct ConnectionTable {
    slots: Vec<Option<Connection>>,
    count: usize,
}

impl ConnectionTable {
    pub fn new(capacity: usize) -> Self {
        ConnectionTable {
            slots: (0..capacity).map(|_| None).collect(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.slots.len()
    }

    fn probe(&self, sock: SocketDescriptor) -> impl Iterator<Item = usize> + '_ {
        let capacity = self.slots.len();
        let start = sock.bucket(capacity);
        (0..capacity).map(move |offset| (start + offset) % capacity)
    }

    pub fn find_free(&self, sock: SocketDescriptor) -> Option<usize> {
        self.probe(sock).find(|&i| self.slots[i].is_none())
    }

    pub fn find_existing(&self, sock: SocketDescriptor) -> Option<usize> {
        self.probe(sock)
            .find(|&i| matches!(&self.slots[i], Some(c) if c.sock == sock))
    }

    /// Refuses a socket already present in the table (spec.md §4.B: `register`
    /// must not let a second entry for the same `sock` become reachable
    /// while an earlier one still occupies a slot via `find_existing`).
    pub fn register(&mut self, conn: Connection) -> Result<usize, TableError> {
        if self.find_existing(conn.sock).is_some() {
            return Err(TableError::AlreadyRegistered);
        }
        let idx = self.find_free(conn.sock).ok_or(TableError::TableFull)?;
        self.slots[idx] = Some(conn);
        self.count += 1;
        Ok(idx)
    }

    pub fn release(&mut self, sock: SocketDescriptor) -> Result<Connection, TableError> {
        let idx = self.find_existing(sock).ok_or(TableError::NotFound)?;
        self.count -= 1;
        Ok(self.slots[idx].take().expect("find_existing only returns occupied slots"))
    }

    pub fn get(&self, sock: SocketDescriptor) -> Option<&Connection> {
        self.find_existing(sock).and_then(move |i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, sock: SocketDescriptor) -> Option<&mut Connection> {
        let idx = self.find_existing(sock)?;
        self.slots[idx].as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.slots.iter().enumerate().filter_map(|(i, c)| c.as_ref().map(|c| (i, c)))
    }

    /// `FromClient` sockets idle for strictly more than `max_idle` and not
    /// flagged `NO_TIMEOUT`, per spec.md §4.F step 6 ("for every slot where
    /// `type = FromClient` and `now − last_active > MAX_IDLE`") and
    /// `connection_idlecheck()`'s own two guards (`net_server.c:355`:
    /// `if (cp->cn_active != FromClientDIS) continue;`, `net_server.c:357`:
    /// `if ((now - cn_lasttime) <= PBS_NET_MAXCONNECTIDLE) continue;`).
    /// Listeners, pipes and datagram sockets are never swept here, so a
    /// quiet server doesn't close its own listening socket. The event loop
    /// calls this unconditionally on every iteration; the original ran it
    /// only `#ifndef WIN32`, which spec.md calls out as a latent defect we
    /// don't reproduce.
    pub fn expired(&self, now: Instant, max_idle: Duration) -> Vec<SocketDescriptor> {
        self.iter()
            .filter(|(_, c)| {
                c.kind == ConnectionKind::FromClient
                    && !c.auth.contains(AuthFlags::NO_TIMEOUT)
                    && c.idle_for(now) > max_idle
            })
            .map(|(_, c)| c.sock)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(fd: i32) -> Connection {
        Connection::new(SocketDescriptor::new(fd), ConnectionKind::FromClient, None)
    }

    #[test]
    fn register_and_find() {
        let mut table = ConnectionTable::new(8);
        let idx = table.register(conn(3)).unwrap();
        assert_eq!(table.find_existing(SocketDescriptor::new(3)), Some(idx));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn table_full_when_capacity_exhausted() {
        let mut table = ConnectionTable::new(2);
        table.register(conn(0)).unwrap();
        table.register(conn(1)).unwrap();
        assert_eq!(table.register(conn(2)).unwrap_err(), TableError::TableFull);
    }

    #[test]
    fn release_missing_socket_is_not_found() {
        let mut table = ConnectionTable::new(4);
        assert_eq!(table.release(SocketDescriptor::new(9)).unwrap_err(), TableError::NotFound);
    }

    #[test]
    fn probe_wraps_and_survives_a_hole_mid_run() {
        // capacity 4: sockets 4 and 8 both bucket to 0, so the second one
        // lands at 1 via linear probing.
        let mut table = ConnectionTable::new(4);
        table.register(conn(4)).unwrap(); // bucket 0
        table.register(conn(8)).unwrap(); // bucket 0 taken, lands at 1
        table.release(SocketDescriptor::new(4)).unwrap(); // hole at slot 0
        // socket 8 must still be findable by scanning past the hole.
        assert!(table.find_existing(SocketDescriptor::new(8)).is_some());
        // and a fresh socket that also hashes to 0 reuses the hole, not slot 2.
        let idx = table.register(conn(12)).unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn register_refuses_a_socket_already_present() {
        let mut table = ConnectionTable::new(4);
        table.register(conn(5)).unwrap();
        assert_eq!(table.register(conn(5)).unwrap_err(), TableError::AlreadyRegistered);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn expired_excludes_no_timeout_connections() {
        let mut table = ConnectionTable::new(4);
        let mut a = conn(1);
        a.last_active = Instant::now() - Duration::from_secs(1000);
        let mut b = conn(2);
        b.last_active = Instant::now() - Duration::from_secs(1000);
        b.auth.insert(AuthFlags::NO_TIMEOUT);
        table.register(a).unwrap();
        table.register(b).unwrap();

        let expired = table.expired(Instant::now(), Duration::from_secs(120));
        assert_eq!(expired, vec![SocketDescriptor::new(1)]);
    }

    #[test]
    fn expired_never_sweeps_listeners() {
        let mut table = ConnectionTable::new(4);
        let mut listener = Connection::new(SocketDescriptor::new(3), ConnectionKind::PrimaryListener, None);
        listener.last_active = Instant::now() - Duration::from_secs(1000);
        table.register(listener).unwrap();

        assert!(table.expired(Instant::now(), Duration::from_secs(120)).is_empty());
    }

    #[test]
    fn expired_requires_strictly_greater_than_max_idle() {
        let mut table = ConnectionTable::new(4);
        let now = Instant::now();
        let mut c = conn(6);
        c.last_active = now - Duration::from_secs(120);
        table.register(c).unwrap();

        // idle_for(now) is exactly max_idle, not strictly greater, so not yet
        // expired; `now` is reused on both sides to keep this deterministic.
        assert!(table.expired(now, Duration::from_secs(120)).is_empty());
    }
}
