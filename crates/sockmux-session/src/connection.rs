use std::any::Any;
use std::fmt;
use std::net::{SocketAddrV4, TcpStream};
use std::time::Instant;

use sockmux_frame::{FrameError, FramedBuffer};
use tracing::trace;

use crate::error::{Result, SessionError};

/// Handle to a connection within its owning manager.
///
/// Ids are minted by the manager and never reused within its lifetime. For
/// datagram transports the id is also the pseudo socket handle: there is no
/// per-peer descriptor underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

impl ConnId {
    /// Raw id value, usable as an opaque tag.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// The transport side of a connection.
pub(crate) enum TransportHandle {
    /// A connected stream socket owned by this connection.
    Stream(TcpStream),
    /// Datagram pseudo-connection; I/O goes through the manager's one
    /// bound socket.
    Datagram,
    /// The transport has been released.
    Released,
}

/// One peer, with its packet queues and liveness state.
///
/// Connections are owned by their [`SocketManager`](crate::SocketManager)
/// and borrowed through [`connection_mut`](crate::SocketManager::connection_mut).
/// `read` and `write` operate purely on the in-memory queues; the bytes
/// move during the manager's `poll`.
pub struct Connection {
    pub(crate) id: ConnId,
    pub(crate) peer: SocketAddrV4,
    pub(crate) handle: TransportHandle,
    pub(crate) incoming: FramedBuffer,
    pub(crate) outgoing: FramedBuffer,
    /// Wire bytes pulled from `outgoing` but not yet accepted by the OS.
    pub(crate) carry: Vec<u8>,
    pub(crate) carry_len: usize,
    /// Time of the last byte received from the peer.
    pub(crate) last_active: Instant,
    /// Time of the last byte sent to the peer.
    pub(crate) last_keepalive: Instant,
    pub(crate) closed: bool,
    pub(crate) accepted: bool,
    max_message: usize,
    pub(crate) notifier: Option<Box<dyn FnMut(ConnId) + Send>>,
    user_data: Option<Box<dyn Any + Send>>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnId,
        peer: SocketAddrV4,
        handle: TransportHandle,
        max_message: usize,
        queue_size: usize,
        max_messages: usize,
        now: Instant,
    ) -> Self {
        Self {
            id,
            peer,
            handle,
            incoming: FramedBuffer::new(max_message, queue_size, max_messages),
            outgoing: FramedBuffer::new(max_message, queue_size, max_messages),
            carry: vec![0u8; queue_size.max(4)],
            carry_len: 0,
            last_active: now,
            last_keepalive: now,
            closed: false,
            accepted: false,
            max_message,
            notifier: None,
            user_data: None,
        }
    }

    /// This connection's id within its manager.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// The peer's address.
    pub fn peer_addr(&self) -> SocketAddrV4 {
        self.peer
    }

    /// Whether the peer has closed the connection (stream transport) or the
    /// connection has timed out (datagram transport).
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Pull the next whole packet from the input queue.
    ///
    /// Returns `Ok(None)` when nothing is pending — check [`closed`]
    /// (Self::closed) to tell quiet from gone. `Ok(Some(0))` is a keepalive
    /// and may be ignored. Already-buffered packets remain readable after
    /// the connection closes.
    pub fn read(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        match self.incoming.get_message(out) {
            Ok(got) => Ok(got),
            Err(FrameError::Truncated { size, max }) => {
                Err(SessionError::Truncated { size, max })
            }
            // The input queue only fails reads by truncation.
            Err(_) => Err(SessionError::InvalidArgument("read buffer")),
        }
    }

    /// Queue one packet for transmission during the next poll.
    ///
    /// A zero-length packet is a valid keepalive. Returns the number of
    /// bytes queued; [`SessionError::QueueFull`] means the output window is
    /// exhausted — retry after a poll has drained it.
    pub fn write(&mut self, payload: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        match self.outgoing.put_message(payload) {
            Ok(queued) => {
                trace!(conn = self.id.0, bytes = queued, "queued packet");
                Ok(queued)
            }
            Err(FrameError::Oversized { size, max }) => {
                Err(SessionError::Oversized { size, max })
            }
            Err(_) => Err(SessionError::QueueFull),
        }
    }

    /// Install a notifier callback.
    ///
    /// A connection with a notifier is never returned in `poll`'s active
    /// array; instead the callback fires once per poll with activity (or
    /// close) on this connection. Do not remove a notifier from inside a
    /// poll.
    pub fn set_notifier(&mut self, notifier: impl FnMut(ConnId) + Send + 'static) {
        self.notifier = Some(Box::new(notifier));
    }

    /// Remove the notifier; the connection shows up in the active array
    /// again.
    pub fn clear_notifier(&mut self) {
        self.notifier = None;
    }

    pub fn has_notifier(&self) -> bool {
        self.notifier.is_some()
    }

    /// Attach arbitrary user data. The library never inspects it.
    pub fn set_user_data(&mut self, data: Box<dyn Any + Send>) {
        self.user_data = Some(data);
    }

    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref().map(|data| data as &dyn Any)
    }

    pub fn user_data_mut(&mut self) -> Option<&mut dyn Any> {
        self.user_data
            .as_deref_mut()
            .map(|data| data as &mut dyn Any)
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any + Send>> {
        self.user_data.take()
    }

    /// Whether the write driver has anything to push to the OS.
    pub(crate) fn wants_to_write(&self) -> bool {
        !self.closed && (self.carry_len > 0 || self.outgoing.message_count() > 0)
    }

    /// Whether the input queue can take another maximum-size packet.
    pub(crate) fn wants_to_read(&self) -> bool {
        !self.closed && self.incoming.can_accept(self.max_message)
    }

    /// Mark closed and release the transport handle. Monotonic.
    pub(crate) fn close(&mut self) {
        if !self.closed {
            trace!(conn = self.id.0, peer = %self.peer, "closing connection");
            self.closed = true;
            self.handle = TransportHandle::Released;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .field("accepted", &self.accepted)
            .field("queued_in", &self.incoming.message_count())
            .field("queued_out", &self.outgoing.message_count())
            .finish()
    }
}
