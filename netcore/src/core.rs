use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::time::{Duration, Instant};

use slog::{info, warn, Logger};

use crate::conn::{AuthFlags, Connection, ConnectionKind, ConnectionTable};
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::readiness::{Interest, MioReadiness, Readiness};
use crate::security::{AuthOutcome, SecurityProvider};
use crate::sock::SocketDescriptor;

/// Per-connection application behaviour, the trait form of the original's
/// `cn_func`/`cn_oncl` function-pointer pair (see REDESIGN FLAGS, "function
/// pointers as virtual dispatch"). One instance is created per accepted
/// connection by the generation's factory passed to [`Core::init_network`].
pub trait ConnectionHandler {
    fn on_readable(&mut self, sock: SocketDescriptor);
    fn on_close(&mut self, _sock: SocketDescriptor) {}
}

enum OwnedSocket {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// The event loop and its owned state: the connection table, the readiness
/// primitive, the security provider, and the sockets and handlers the table
/// doesn't itself own. Generic over the readiness implementation so tests can
/// supply a fake one; production code only ever builds `Core<MioReadiness>`
/// via [`Core::new`].
pub struct Core<Rd: Readiness = MioReadiness> {
    conns: ConnectionTable,
    readiness: Rd,
    security: Box<dyn SecurityProvider>,
    handlers: HashMap<SocketDescriptor, Box<dyn ConnectionHandler>>,
    generations: Vec<Box<dyn Fn() -> Box<dyn ConnectionHandler>>>,
    sockets: HashMap<SocketDescriptor, OwnedSocket>,
    max_idle: Duration,
    listen_backlog: i32,
    logger: Logger,
}

impl Core<MioReadiness> {
    pub fn new(config: &CoreConfig, security: Box<dyn SecurityProvider>, logger: Logger) -> Result<Self, CoreError> {
        let capacity = match config.capacity_override {
            Some(capacity) => capacity,
            None => descriptor_limit()?,
        };
        let readiness = MioReadiness::new(capacity)?;
        Ok(Core::with_parts(capacity, readiness, security, config, logger))
    }
}

impl<Rd: Readiness> Core<Rd> {
    fn with_parts(capacity: usize, readiness: Rd, security: Box<dyn SecurityProvider>, config: &CoreConfig, logger: Logger) -> Self {
        Core {
            conns: ConnectionTable::new(capacity),
            readiness,
            security,
            handlers: HashMap::new(),
            generations: Vec::new(),
            sockets: HashMap::new(),
            max_idle: Duration::from_secs(config.max_idle_secs),
            listen_backlog: config.listen_backlog,
            logger,
        }
    }

    #[cfg(test)]
    fn for_test(capacity: usize, readiness: Rd, logger: Logger) -> Self {
        Core::with_parts(
            capacity,
            readiness,
            Box::new(crate::security::CheckPortAuthenticator),
            &CoreConfig { capacity_override: Some(capacity), ..CoreConfig::default() },
            logger,
        )
    }

    pub fn num_connections(&self) -> usize {
        self.conns.len()
    }

    pub fn is_authenticated(&self, sock: SocketDescriptor) -> bool {
        self.conns.get(sock).map(|c| c.auth.contains(AuthFlags::AUTHENTICATED)).unwrap_or(false)
    }

    /// Registers a listening socket under one of the two supported
    /// generations (primary, then secondary); a third call is rejected.
    pub fn init_network(
        &mut self,
        port: u16,
        handler_factory: impl Fn() -> Box<dyn ConnectionHandler> + 'static,
    ) -> Result<(), CoreError> {
        if self.generations.len() >= 2 {
            return Err(CoreError::TooManyGenerations);
        }

        let listener = bind_listener(port, self.listen_backlog).map_err(CoreError::ListenFailed)?;
        let sock = SocketDescriptor::new(listener.as_raw_fd());
        let kind = if self.generations.is_empty() {
            ConnectionKind::PrimaryListener
        } else {
            ConnectionKind::SecondaryListener
        };

        self.conns
            .register(Connection::new(sock, kind, None))
            .map_err(|_| CoreError::OutOfMemory)?;
        self.readiness.arm(sock, Interest::READABLE).map_err(CoreError::ReadinessInit)?;
        self.sockets.insert(sock, OwnedSocket::Listener(listener));
        self.generations.push(Box::new(handler_factory));
        Ok(())
    }

    /// Runs one iteration: wait, dispatch every ready slot in ascending
    /// order, then sweep idle connections unconditionally.
    pub fn run_one(&mut self, waittime: Duration) -> Result<(), CoreError> {
        unblock_signals(&self.logger);
        let wait_result = self.readiness.wait(Some(waittime));
        block_signals(&self.logger);

        let ready = match wait_result {
            Ok(ready) => ready,
            Err(e) => match e.kind() {
                io::ErrorKind::Interrupted | io::ErrorKind::ConnectionReset | io::ErrorKind::WouldBlock => Vec::new(),
                _ => return Err(CoreError::WaitFailed(e)),
            },
        };

        let now = Instant::now();
        for sock in ready {
            self.dispatch_one(sock);
        }
        self.sweep_idle(now);
        Ok(())
    }

    fn dispatch_one(&mut self, sock: SocketDescriptor) {
        let kind = match self.conns.get_mut(sock) {
            Some(conn) => {
                conn.touch();
                conn.kind
            }
            None => return,
        };

        if kind == ConnectionKind::Idle {
            self.close_connection(sock, "idle-slot");
            return;
        }

        let skips_auth_gate = matches!(
            kind,
            ConnectionKind::PrimaryListener | ConnectionKind::SecondaryListener | ConnectionKind::ReliableDatagram
        );

        if !skips_auth_gate && !self.is_authenticated(sock) {
            if !self.authenticate(sock) {
                self.close_connection(sock, "auth");
                return;
            }
        }

        match kind {
            ConnectionKind::PrimaryListener | ConnectionKind::SecondaryListener => self.accept_one(sock),
            _ => {
                if let Some(mut handler) = self.handlers.remove(&sock) {
                    handler.on_readable(sock);
                    self.handlers.insert(sock, handler);
                }
            }
        }
    }

    /// Runs the handshake at most once per connection per readable event.
    /// Returns `false` only on `AuthOutcome::Fail`; a bare `CheckPort`
    /// verdict never closes the connection, matching `engage_authentication`
    /// returning `0` whether or not the privileged-port check actually set
    /// `Authenticated`.
    fn authenticate(&mut self, sock: SocketDescriptor) -> bool {
        match self.security.server_auth(sock) {
            AuthOutcome::Ok => {
                if let Some(conn) = self.conns.get_mut(sock) {
                    conn.auth.insert(AuthFlags::AUTHENTICATED);
                }
                true
            }
            AuthOutcome::CheckPort => {
                let privileged = self.conns.get(sock).map(|c| c.auth.contains(AuthFlags::FROM_PRIVILEGED_PORT)).unwrap_or(false);
                if privileged {
                    if let Some(conn) = self.conns.get_mut(sock) {
                        conn.auth.insert(AuthFlags::AUTHENTICATED);
                    }
                }
                true
            }
            AuthOutcome::Fail => false,
        }
    }

    fn accept_one(&mut self, listener_sock: SocketDescriptor) {
        let generation_index = match self.conns.get(listener_sock).map(|c| c.kind) {
            Some(ConnectionKind::PrimaryListener) => 0,
            Some(ConnectionKind::SecondaryListener) => 1,
            _ => return,
        };

        let accepted = match self.sockets.get(&listener_sock) {
            Some(OwnedSocket::Listener(listener)) => listener.accept(),
            _ => return,
        };

        let (stream, addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(self.logger, "accept failed"; "error" => %e);
                return;
            }
        };
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(self.logger, "failed to set accepted socket nonblocking"; "error" => %e);
        }

        if self.conns.len() >= self.conns.capacity() {
            warn!(self.logger, "ConnectionsFull"; "peer" => %addr);
            drop(stream);
            return;
        }

        let sock = SocketDescriptor::new(stream.as_raw_fd());
        let mut conn = Connection::new(sock, ConnectionKind::FromClient, Some(addr));
        if addr.port() < 1024 {
            conn.auth.insert(AuthFlags::FROM_PRIVILEGED_PORT);
        }
        if self.conns.register(conn).is_err() {
            return;
        }
        if let Err(e) = self.readiness.arm(sock, Interest::READABLE) {
            warn!(self.logger, "failed to arm accepted socket"; "error" => %e);
        }

        let handler = (self.generations[generation_index])();
        self.handlers.insert(sock, handler);
        self.sockets.insert(sock, OwnedSocket::Stream(stream));
    }

    fn close_connection(&mut self, sock: SocketDescriptor, cause: &'static str) {
        if let Some(mut handler) = self.handlers.remove(&sock) {
            handler.on_close(sock);
        }
        if let Err(e) = self.security.close_socket(sock) {
            warn!(self.logger, "security close_socket failed"; "sock" => %sock, "error" => e);
        }
        let peer = self.conns.get(sock).and_then(|c| c.peer_addr);
        if let Err(e) = self.readiness.disarm(sock) {
            warn!(self.logger, "failed to disarm socket"; "sock" => %sock, "error" => %e);
        }
        let _ = self.conns.release(sock);
        self.sockets.remove(&sock);
        info!(self.logger, "closed connection";
            "sock" => %sock,
            "peer" => peer.map(|p| p.to_string()).unwrap_or_default(),
            "cause" => cause);
    }

    fn sweep_idle(&mut self, now: Instant) {
        for sock in self.conns.expired(now, self.max_idle) {
            let peer = self.conns.get(sock).and_then(|c| c.peer_addr);
            info!(self.logger, "timeout connection";
                "peer" => peer.map(describe_peer_addr).unwrap_or_default());
            self.close_connection(sock, "timeout");
        }
    }

    /// `net_close(-1)`: tears down every live connection without invoking
    /// `on_close` (teardown must not re-enter user code), then shuts the
    /// security provider down.
    pub fn shutdown(&mut self) {
        let socks: Vec<SocketDescriptor> = self.conns.iter().map(|(_, c)| c.sock).collect();
        for sock in socks {
            self.handlers.remove(&sock);
            let _ = self.readiness.disarm(sock);
            let _ = self.conns.release(sock);
            self.sockets.remove(&sock);
        }
        self.security.close_app();
    }
}

fn describe_peer_addr(addr: SocketAddr) -> String {
    format!("{}", addr.ip())
}

fn descriptor_limit() -> Result<usize, CoreError> {
    let mut limit: libc::rlimit = unsafe { mem::zeroed() };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 {
        return Err(CoreError::DescriptorLimit(io::Error::last_os_error()));
    }
    Ok(limit.rlim_cur as usize)
}

/// Builds a non-blocking listening socket with `SO_REUSEADDR` and a caller-
/// chosen backlog, neither of which `std::net::TcpListener::bind` alone
/// exposes control over, so the socket is built with raw libc calls and
/// handed to `TcpListener::from_raw_fd` to regain the standard API surface.
fn bind_listener(port: u16, backlog: i32) -> io::Result<TcpListener> {
    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let reuseaddr: libc::c_int = 1;
        if libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuseaddr as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        ) != 0
        {
            let e = io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        let mut addr: libc::sockaddr_in = mem::zeroed();
        addr.sin_family = libc::AF_INET as libc::sa_family_t;
        addr.sin_port = port.to_be();
        addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();

        if libc::bind(
            fd,
            &addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        ) != 0
        {
            let e = io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        if libc::listen(fd, backlog) != 0 {
            let e = io::Error::last_os_error();
            libc::close(fd);
            return Err(e);
        }

        let listener = TcpListener::from_raw_fd(fd);
        listener.set_nonblocking(true)?;
        Ok(listener)
    }
}

fn unblock_signals(logger: &Logger) {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut set);
        if libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) != 0 {
            warn!(logger, "sigprocmask(UNBLOCK) failed"; "error" => %io::Error::last_os_error());
        }
    }
}

fn block_signals(logger: &Logger) {
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut set);
        if libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
            warn!(logger, "sigprocmask(BLOCK) failed"; "error" => %io::Error::last_os_error());
        }
    }
}
