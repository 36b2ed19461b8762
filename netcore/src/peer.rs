use std::ffi::CStr;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::PeerError;

/// Reverse-resolves `addr` to a lowercase hostname, falling back to the
/// dotted-quad literal on failure, per `get_connecthost()` in `net_server.c`.
///
/// Truncation to `max_len - 1` bytes is mandatory either way (the original
/// copies into a fixed `ebuf[PBS_MAXHOSTNAME + 1]`), but only an over-long
/// *resolved* hostname is an error: `get_connecthost()` (`net_server.c:848`)
/// never fails on the dotted-quad fallback, it only ever truncates it.
pub fn peer_hostname(addr: SocketAddr, max_len: usize) -> Result<String, PeerError> {
    if max_len == 0 {
        return Err(PeerError::TooLong);
    }
    let ip = addr.ip();
    match reverse_resolve(ip) {
        Some(resolved) => truncate_resolved(resolved, max_len),
        None => Ok(truncate_lossy(dotted_quad(ip), max_len)),
    }
}

fn truncate_resolved(s: String, max_len: usize) -> Result<String, PeerError> {
    if s.len() <= max_len - 1 {
        Ok(s)
    } else {
        Err(PeerError::TooLong)
    }
}

fn truncate_lossy(mut s: String, max_len: usize) -> String {
    if s.len() > max_len - 1 {
        s.truncate(max_len - 1);
    }
    s
}

fn dotted_quad(ip: IpAddr) -> String {
    ip.to_string()
}

fn reverse_resolve(ip: IpAddr) -> Option<String> {
    let v4 = match ip {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => return None,
    };
    unsafe { reverse_resolve_ipv4(v4) }.map(|s| s.to_lowercase())
}

/// `getnameinfo(3)` with `NI_NAMEREQD`, so a missing PTR record is reported
/// as a lookup failure (and falls back to the dotted quad) rather than
/// silently returning the numeric address back as a "hostname".
unsafe fn reverse_resolve_ipv4(addr: Ipv4Addr) -> Option<String> {
    let mut sin: libc::sockaddr_in = mem::zeroed();
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = 0;
    sin.sin_addr.s_addr = u32::from_ne_bytes(addr.octets());

    let mut host = [0 as libc::c_char; libc::NI_MAXHOST as usize];
    let rc = libc::getnameinfo(
        &sin as *const libc::sockaddr_in as *const libc::sockaddr,
        mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        host.as_mut_ptr(),
        host.len() as libc::socklen_t,
        std::ptr::null_mut(),
        0,
        libc::NI_NAMEREQD,
    );
    if rc != 0 {
        return None;
    }
    Some(CStr::from_ptr(host.as_ptr()).to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_dotted_quad_when_unresolvable() {
        // TEST-NET-1, guaranteed to have no PTR record in any real DNS.
        let addr: SocketAddr = "192.0.2.55:0".parse().unwrap();
        let hostname = peer_hostname(addr, 64).unwrap();
        assert_eq!(hostname, "192.0.2.55");
    }

    #[test]
    fn truncates_to_buffer_size_minus_one() {
        let addr: SocketAddr = "203.0.113.200:0".parse().unwrap();
        let hostname = peer_hostname(addr, 6).unwrap();
        assert_eq!(hostname.len(), 5);
        assert_eq!(hostname, "203.0");
    }

    #[test]
    fn dotted_quad_fallback_truncates_instead_of_erroring() {
        // TEST-NET-3, no PTR record: falls back to the dotted quad, which
        // get_connecthost() truncates rather than rejects even for a buffer
        // this small.
        let addr: SocketAddr = "203.0.113.200:0".parse().unwrap();
        assert_eq!(peer_hostname(addr, 1).unwrap(), "");
    }

    #[test]
    fn resolved_hostname_too_long_for_buffer_is_an_error() {
        assert_eq!(
            truncate_resolved("some-really-long-resolved-hostname.example.com".to_string(), 5),
            Err(PeerError::TooLong)
        );
    }
}
