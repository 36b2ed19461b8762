use std::os::unix::io::RawFd;

/// A raw socket or pipe descriptor, as handed to us by the kernel.
///
/// The original C source mixes `int cn_sock` with `(unsigned int)cn_sock` at the
/// two call sites that hash it into the connection table (`connection_find_usable_index`
/// and `connection_find_actual_index`), which on a platform with negative descriptor
/// sentinels would probe a different bucket than the one the socket was registered
/// under. We fix on a single signed representation and make the hash explicitly
/// `rem_euclid`, so the probe sequence is well defined for any value a `socket(2)`
/// call could plausibly return (see DESIGN.md, "descriptor representation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketDescriptor(RawFd);

impl SocketDescriptor {
    pub fn new(fd: RawFd) -> Self {
        SocketDescriptor(fd)
    }

    pub fn raw(self) -> RawFd {
        self.0
    }

    /// Bucket this descriptor hashes to in a table of the given capacity.
    pub fn bucket(self, capacity: usize) -> usize {
        self.0.rem_euclid(capacity as i32) as usize
    }
}

impl From<RawFd> for SocketDescriptor {
    fn from(fd: RawFd) -> Self {
        SocketDescriptor::new(fd)
    }
}

impl std::fmt::Display for SocketDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
