use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::fd::RawFd;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info};

use crate::error::{Result, TransportError};

/// Listen backlog for stream listeners. Generous, since the session layer
/// drains accepts on every poll cycle.
const LISTEN_BACKLOG: i32 = 100;

/// Create a non-blocking IPv4 stream listener bound to `port`.
///
/// `SO_REUSEADDR` is set before binding so a restarted server does not
/// collide with lingering TIME_WAIT sockets.
pub fn listen_stream(port: u16) -> Result<TcpListener> {
    let bind_err = |source| TransportError::Bind { port, source };

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    info!(port, "listening on stream socket");
    Ok(socket.into())
}

/// Create a non-blocking IPv4 datagram socket bound to `port`
/// (0 for an ephemeral port).
pub fn bind_datagram(port: u16) -> Result<UdpSocket> {
    let bind_err = |source| TransportError::Bind { port, source };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    debug!(port, "bound datagram socket");
    Ok(socket.into())
}

/// Connect a stream socket to `addr`.
///
/// The connect itself is blocking (one transport connect attempt); the
/// returned stream is switched to non-blocking mode with Nagle's algorithm
/// disabled, ready for readiness-driven I/O.
pub fn connect_stream(addr: SocketAddrV4) -> Result<TcpStream> {
    let connect_err = |source| TransportError::Connect { addr, source };

    let stream = TcpStream::connect(addr).map_err(connect_err)?;
    stream.set_nodelay(true).map_err(connect_err)?;
    stream.set_nonblocking(true).map_err(connect_err)?;

    debug!(%addr, "connected stream socket");
    Ok(stream)
}

/// Resolve a host name (or dotted-quad string) to an IPv4 address.
///
/// This uses the system resolver and may block for the duration of the
/// lookup; it is not suitable for a real-time loop.
pub fn resolve_host_v4(host: &str, port: u16) -> Result<SocketAddrV4> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Resolve {
            host: host.to_string(),
            source,
        })?;
    for addr in addrs {
        if let std::net::SocketAddr::V4(v4) = addr {
            return Ok(v4);
        }
    }
    Err(TransportError::NoIpv4Address {
        host: host.to_string(),
    })
}

/// Retrieve and clear a socket's pending error condition (`SO_ERROR`).
///
/// Call this on a descriptor the readiness selector reported as errored.
/// Returns `Ok(None)` when no error is pending.
pub fn take_socket_error(fd: RawFd) -> Result<Option<std::io::Error>> {
    let mut pending: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

    // SAFETY: `pending` and `len` are valid writable pointers for the
    // provided sizes, and `fd` is an open descriptor owned by the caller.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut pending as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    if pending == 0 {
        Ok(None)
    } else {
        Ok(Some(std::io::Error::from_raw_os_error(pending)))
    }
}

/// Size a socket's kernel send and receive buffers.
///
/// Datagram managers grow these as connections accumulate so bursts are
/// absorbed by the kernel instead of dropped.
pub fn set_queue_buffers(socket: &UdpSocket, bytes: usize) -> Result<()> {
    let sock = SockRef::from(socket);
    sock.set_send_buffer_size(bytes)?;
    sock.set_recv_buffer_size(bytes)?;
    debug!(bytes, "sized kernel socket buffers");
    Ok(())
}
