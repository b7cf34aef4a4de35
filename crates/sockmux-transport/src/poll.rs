use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, TransportError};

/// Readiness reported for one registered descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    /// The caller-supplied tag the descriptor was registered with.
    pub tag: u64,
    pub readable: bool,
    pub writable: bool,
    /// An error condition is pending on the descriptor; retrieve it with
    /// [`take_socket_error`](crate::socket::take_socket_error).
    pub errored: bool,
}

/// A reusable readiness set over `poll(2)`.
///
/// Register each descriptor with an opaque tag (the session layer uses
/// connection ids), wait once, then iterate the ready descriptors. The
/// set is cleared and rebuilt every poll cycle; the backing allocations
/// are reused.
#[derive(Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
    tags: Vec<u64>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all registered descriptors, keeping allocations.
    pub fn clear(&mut self) {
        self.fds.clear();
        self.tags.clear();
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Register a descriptor with the given interest.
    ///
    /// Error conditions are always reported, whatever the interest.
    pub fn register(&mut self, fd: RawFd, tag: u64, read: bool, write: bool) {
        let mut events: libc::c_short = 0;
        if read {
            events |= libc::POLLIN;
        }
        if write {
            events |= libc::POLLOUT;
        }
        self.fds.push(libc::pollfd {
            fd,
            events,
            revents: 0,
        });
        self.tags.push(tag);
    }

    /// Wait for readiness on the registered descriptors.
    ///
    /// The timeout is clamped to zero from below and to `i32::MAX`
    /// milliseconds from above. Returns the number of ready descriptors;
    /// an interrupted wait reports zero rather than failing.
    pub fn wait(&mut self, timeout: Duration) -> Result<usize> {
        let millis = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        // SAFETY: `fds` is a live, properly initialized Vec of pollfd and
        // the length passed matches it; the kernel only writes `revents`
        // within those bounds.
        let rc = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(TransportError::Poll(err));
        }
        Ok(rc as usize)
    }

    /// Iterate the descriptors that reported readiness in the last wait.
    pub fn events(&self) -> impl Iterator<Item = Readiness> + '_ {
        self.fds
            .iter()
            .zip(self.tags.iter())
            .filter(|(fd, _)| fd.revents != 0)
            .map(|(fd, &tag)| Readiness {
                tag,
                readable: fd.revents & (libc::POLLIN | libc::POLLHUP) != 0,
                writable: fd.revents & libc::POLLOUT != 0,
                errored: fd.revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::os::fd::AsRawFd;
    use std::time::Instant;

    use super::*;
    use crate::socket::bind_datagram;

    #[test]
    fn empty_set_times_out() {
        let mut set = PollSet::new();
        let start = Instant::now();
        let ready = set.wait(Duration::from_millis(30)).unwrap();
        assert_eq!(ready, 0);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn datagram_arrival_reports_readable() {
        let receiver = bind_datagram(0).unwrap();
        let sender = bind_datagram(0).unwrap();
        let dest = SocketAddrV4::new(
            Ipv4Addr::LOCALHOST,
            receiver.local_addr().unwrap().port(),
        );
        sender.send_to(b"ping", dest).unwrap();

        let mut set = PollSet::new();
        set.register(receiver.as_raw_fd(), 7, true, false);
        let ready = set.wait(Duration::from_millis(500)).unwrap();
        assert_eq!(ready, 1);

        let events: Vec<_> = set.events().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag, 7);
        assert!(events[0].readable);
        assert!(!events[0].errored);
    }

    #[test]
    fn idle_datagram_socket_is_writable() {
        let socket = bind_datagram(0).unwrap();
        let mut set = PollSet::new();
        set.register(socket.as_raw_fd(), 1, false, true);
        let ready = set.wait(Duration::ZERO).unwrap();
        assert_eq!(ready, 1);
        assert!(set.events().next().unwrap().writable);
    }

    #[test]
    fn clear_reuses_the_set() {
        let socket = bind_datagram(0).unwrap();
        let mut set = PollSet::new();
        set.register(socket.as_raw_fd(), 1, true, true);
        assert_eq!(set.len(), 1);
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.wait(Duration::ZERO).unwrap(), 0);
    }
}
