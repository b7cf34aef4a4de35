use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::{ErrorKind as IoKind, Read, Write};
use std::net::{SocketAddr, SocketAddrV4, TcpListener, UdpSocket};
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sockmux_transport::{
    bind_datagram, connect_stream, listen_stream, resolve_host_v4, set_queue_buffers,
    take_socket_error, PollSet, Readiness,
};
use tracing::{debug, info, trace, warn};

use crate::config::{
    Settings, DEFAULT_MAX_MESSAGE_COUNT, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_QUEUE_SIZE,
    SUPPORTED_VERSION,
};
use crate::connection::{ConnId, Connection, TransportHandle};
use crate::error::{Result, SessionError};
use crate::report::{
    classify_os_error, emit, ErrorArea, ErrorKind, ErrorReport, ErrorSink, Severity,
};

/// Poll-set tag for the listening / bound endpoint.
const ENDPOINT_TAG: u64 = 0;

/// Wire length field is 16 bits, so a direction's queue plus one message
/// must stay under this.
const WIRE_BUDGET: usize = 65536;

/// Minimum per-connection kernel queuing allotment.
const MIN_KERNEL_QUEUE: usize = 1024;
/// Minimum total kernel buffer size.
const MIN_KERNEL_TOTAL: usize = 4096;
/// Extra queuing headroom (in connections) for accepting managers.
const ACCEPT_HEADROOM: usize = 5;

/// The central object of the library: one endpoint, many connections,
/// all serviced by [`poll`](SocketManager::poll).
///
/// A manager is single-owner: it and every connection it owns must be used
/// from one thread. Run several managers (in separate threads) for more.
pub struct SocketManager {
    settings: Settings,
    /// Clone of `settings.notify`; reports fall back to the process default.
    sink: Option<Arc<dyn ErrorSink>>,
    /// Listening endpoint for reliable servers.
    listener: Option<TcpListener>,
    /// The one bound socket every unreliable manager multiplexes over.
    datagram: Option<UdpSocket>,
    /// Claimed connections, by id. May briefly contain closed connections
    /// the user has not disposed yet; those take no further part in I/O.
    conns: HashMap<ConnId, Connection>,
    /// Peer-address index for unreliable demultiplexing.
    by_addr: HashMap<SocketAddrV4, ConnId>,
    /// Admitted but not yet claimed connections.
    pending: HashMap<ConnId, Connection>,
    accept_queue: VecDeque<ConnId>,
    poll_set: PollSet,
    /// Read scratch, sized to one maximum message.
    scratch: Vec<u8>,
    next_id: u64,
    /// Kernel buffer size currently configured on the datagram socket.
    cur_queue_space: usize,
    /// Clock of the running poll cycle.
    now: Instant,
}

impl SocketManager {
    /// Open a networking endpoint according to `settings`.
    ///
    /// Zero-valued sizing fields are replaced by their defaults (each
    /// substitution is noted through the error sink). Fails when an
    /// accepting manager has port 0, when the requested protocol version is
    /// newer than [`SUPPORTED_VERSION`], or when `queue_size +
    /// max_message_size` exceeds what the 16-bit wire length can express.
    pub fn open(mut settings: Settings) -> Result<SocketManager> {
        let sink = settings.notify.clone();

        if settings.version > SUPPORTED_VERSION {
            emit(
                &sink,
                ErrorReport {
                    severity: Severity::Catastrophe,
                    area: ErrorArea::Init,
                    kind: ErrorKind::UnsupportedVersion,
                    os_error: None,
                    conn: None,
                    message: Some(format!(
                        "requested protocol version {} is newer than supported {}",
                        settings.version, SUPPORTED_VERSION
                    )),
                },
            );
            return Err(SessionError::UnsupportedVersion {
                requested: settings.version,
                supported: SUPPORTED_VERSION,
            });
        }

        if settings.max_message_count == 0 {
            Self::note_default(&sink, "max_message_count", DEFAULT_MAX_MESSAGE_COUNT);
            settings.max_message_count = DEFAULT_MAX_MESSAGE_COUNT;
        }
        if settings.max_message_size == 0 {
            Self::note_default(&sink, "max_message_size", DEFAULT_MAX_MESSAGE_SIZE);
            settings.max_message_size = DEFAULT_MAX_MESSAGE_SIZE;
        }
        if settings.queue_size == 0 {
            Self::note_default(&sink, "queue_size", DEFAULT_QUEUE_SIZE);
            settings.queue_size = DEFAULT_QUEUE_SIZE;
        }

        if settings.accepting && settings.port == 0 {
            return Err(Self::reject_settings(
                &sink,
                "port may not be 0 when accepting",
            ));
        }
        if settings.queue_size + settings.max_message_size > WIRE_BUDGET {
            return Err(Self::reject_settings(
                &sink,
                "queue_size + max_message_size must be at most 65536",
            ));
        }

        let listener = if settings.reliable && settings.accepting {
            match listen_stream(settings.port) {
                Ok(listener) => Some(listener),
                Err(err) => return Err(Self::reject_transport(&sink, ErrorArea::Init, err)),
            }
        } else {
            None
        };
        // Unreliable managers always get their one socket, even when not
        // accepting: outbound pseudo-connections share it.
        let datagram = if !settings.reliable {
            let port = if settings.accepting { settings.port } else { 0 };
            match bind_datagram(port) {
                Ok(socket) => Some(socket),
                Err(err) => return Err(Self::reject_transport(&sink, ErrorArea::Init, err)),
            }
        } else {
            None
        };

        let scratch = vec![0u8; settings.max_message_size];
        let mut manager = SocketManager {
            settings,
            sink,
            listener,
            datagram,
            conns: HashMap::new(),
            by_addr: HashMap::new(),
            pending: HashMap::new(),
            accept_queue: VecDeque::new(),
            poll_set: PollSet::new(),
            scratch,
            next_id: 1,
            cur_queue_space: 0,
            now: Instant::now(),
        };
        manager.change_queuing_space();
        info!(
            port = manager.settings.port,
            reliable = manager.settings.reliable,
            accepting = manager.settings.accepting,
            "socket manager open"
        );
        Ok(manager)
    }

    /// The settings in effect (defaults substituted).
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The locally bound port, where one exists (servers always, unreliable
    /// clients after open, reliable clients never).
    pub fn local_port(&self) -> Option<u16> {
        if let Some(listener) = &self.listener {
            return listener.local_addr().ok().map(|addr| addr.port());
        }
        if let Some(socket) = &self.datagram {
            return socket.local_addr().ok().map(|addr| addr.port());
        }
        None
    }

    /// Borrow a claimed connection.
    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    /// Mutably borrow a claimed connection (for `read`, `write`,
    /// notifier and user-data access).
    pub fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.conns.get_mut(&id)
    }

    /// Connections currently claimed and not closed.
    pub fn live_connections(&self) -> usize {
        self.conns.values().filter(|conn| !conn.closed).count()
    }

    /// Service the endpoint: flush queued output, ingest arrived input,
    /// admit inbound peers, generate keepalives, enforce idle timeouts.
    ///
    /// Blocks for at most `timeout`, returning early once socket activity
    /// settles. Ids of connections with activity are appended to
    /// `out_active` (cleared first), at most `max_active` of them;
    /// connections with a notifier are reported through their callback
    /// instead, exactly once per poll.
    pub fn poll(
        &mut self,
        timeout: Duration,
        out_active: &mut Vec<ConnId>,
        max_active: usize,
    ) -> Result<usize> {
        out_active.clear();
        if max_active == 0 {
            self.emit_report(
                Severity::Error,
                ErrorArea::Session,
                ErrorKind::InvalidParameters,
                None,
                "poll() needs room for at least one active connection",
            );
            return Err(SessionError::InvalidArgument("max_active must be >= 1"));
        }

        let start = Instant::now();
        self.now = start;
        let mut active: BTreeSet<ConnId> = BTreeSet::new();
        let mut notify_pending: BTreeSet<ConnId> = BTreeSet::new();

        self.sweep_timeouts(&mut active, &mut notify_pending);

        // Write interest is seeded from the whole table only on the first
        // pass; later passes re-earn it by making progress.
        let mut write_interest: BTreeSet<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| !conn.closed)
            .map(|(&id, _)| id)
            .collect();
        let mut drive_datagram_writes = true;

        let outcome = loop {
            self.poll_set.clear();
            if let Some(listener) = &self.listener {
                self.poll_set
                    .register(listener.as_raw_fd(), ENDPOINT_TAG, true, false);
            }
            if let Some(socket) = &self.datagram {
                let want_write =
                    drive_datagram_writes && self.conns.values().any(|c| c.wants_to_write());
                self.poll_set
                    .register(socket.as_raw_fd(), ENDPOINT_TAG, true, want_write);
            }
            for (&id, conn) in &self.conns {
                if conn.closed {
                    continue;
                }
                if let TransportHandle::Stream(stream) = &conn.handle {
                    self.poll_set.register(
                        stream.as_raw_fd(),
                        id.0,
                        conn.wants_to_read(),
                        write_interest.contains(&id),
                    );
                }
            }

            let budget = timeout.saturating_sub(start.elapsed());
            let ready = match self.poll_set.wait(budget) {
                Ok(n) => n,
                Err(err) => break Err(SessionError::from(err)),
            };
            if ready == 0 {
                // Pure timeout wakeup.
                break Ok(());
            }

            write_interest.clear();
            let mut progress = false;
            let mut next_datagram_writes = false;
            let events: Vec<Readiness> = self.poll_set.events().collect();

            for event in events {
                if event.tag == ENDPOINT_TAG {
                    if event.errored {
                        self.handle_endpoint_error();
                        continue;
                    }
                    if event.readable {
                        if self.listener.is_some() {
                            progress |= self.accept_inbound_stream();
                        } else {
                            progress |=
                                self.drive_datagram_read(&mut active, &mut notify_pending);
                        }
                    }
                    if event.writable && self.datagram.is_some() {
                        let (moved, more) = self.drive_datagram_write(
                            &mut active,
                            &mut notify_pending,
                            max_active,
                        );
                        progress |= moved;
                        next_datagram_writes = more;
                    }
                } else {
                    let id = ConnId(event.tag);
                    let Some(conn) = self.conns.get_mut(&id) else {
                        continue;
                    };
                    if event.errored {
                        Self::handle_stream_error(conn, &self.sink);
                        Self::mark_active(conn, id, &mut active, &mut notify_pending);
                        continue;
                    }
                    if event.readable && conn.wants_to_read() {
                        progress |=
                            drive_stream_read(conn, &mut self.scratch, self.now, &self.sink);
                        Self::mark_active(conn, id, &mut active, &mut notify_pending);
                        if conn.wants_to_write() {
                            write_interest.insert(id);
                        }
                    }
                    if event.writable && conn.wants_to_write() {
                        let moved = drive_stream_write(conn, self.now, &self.sink);
                        if moved {
                            progress = true;
                            Self::mark_active(conn, id, &mut active, &mut notify_pending);
                            if conn.wants_to_write() {
                                write_interest.insert(id);
                            }
                        }
                    }
                }
                if active.len() >= max_active {
                    debug!("poll filled the active array");
                    break;
                }
            }

            if active.len() >= max_active || !progress || start.elapsed() >= timeout {
                break Ok(());
            }
            // Re-enter with the shrunken budget; connections that closed
            // mid-cycle must not re-join the write set.
            write_interest.retain(|id| self.conns.get(id).is_some_and(|c| !c.closed));
            drive_datagram_writes = next_datagram_writes;
        };

        // Notifiers fire on every exit path, each exactly once.
        for id in notify_pending {
            let Some(mut callback) = self
                .conns
                .get_mut(&id)
                .and_then(|conn| conn.notifier.take())
            else {
                self.emit_report(
                    Severity::Warning,
                    ErrorArea::Session,
                    ErrorKind::InternalError,
                    Some(id),
                    "notifier removed while a notification was in flight",
                );
                continue;
            };
            callback(id);
            if let Some(conn) = self.conns.get_mut(&id) {
                conn.notifier = Some(callback);
            }
        }

        out_active.extend(active.iter().take(max_active).copied());
        match outcome {
            Ok(()) => Ok(out_active.len()),
            // The selector failed but sockets still saw activity: report
            // the activity, the sink already has the error.
            Err(_) if !out_active.is_empty() => Ok(out_active.len()),
            Err(err) => Err(err),
        }
    }

    /// Claim connections admitted during previous polls.
    ///
    /// Claimed connections join the main table (and, for datagram
    /// transports, grow the kernel queue sizing) and start appearing in
    /// poll results.
    pub fn accept(&mut self, max: usize) -> Vec<ConnId> {
        let mut claimed = Vec::new();
        while claimed.len() < max {
            let Some(id) = self.accept_queue.pop_front() else {
                break;
            };
            let Some(mut conn) = self.pending.remove(&id) else {
                continue;
            };
            conn.accepted = true;
            self.conns.insert(id, conn);
            claimed.push(id);
        }
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed inbound connections");
            self.change_queuing_space();
        }
        claimed
    }

    /// Connect to a remote endpoint.
    ///
    /// Name resolution (and, for reliable transport, the connect attempt)
    /// blocks; do this during setup, not inside a latency-sensitive loop.
    /// Unreliable connects reuse the manager's bound socket and queue a
    /// zero-length hello datagram to solicit the server's acknowledgement.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<ConnId> {
        let addr = match resolve_host_v4(host, port) {
            Ok(addr) => addr,
            Err(err) => {
                self.emit_transport(ErrorArea::Address, &err, None);
                return Err(err.into());
            }
        };

        let now = Instant::now();
        let id = self.mint_id();
        if self.settings.reliable {
            let stream = match connect_stream(addr) {
                Ok(stream) => stream,
                Err(err) => {
                    self.emit_transport(ErrorArea::Connect, &err, None);
                    return Err(err.into());
                }
            };
            let mut conn = self.new_connection(id, addr, TransportHandle::Stream(stream), now);
            conn.accepted = true;
            self.conns.insert(id, conn);
        } else {
            let mut conn = self.new_connection(id, addr, TransportHandle::Datagram, now);
            conn.accepted = true;
            // Zero-length hello so the server admits this peer.
            let _ = conn.outgoing.put_message(&[]);
            self.conns.insert(id, conn);
            self.by_addr.insert(addr, id);
        }
        info!(conn = id.0, peer = %addr, "connected");
        Ok(id)
    }

    /// Release a connection: close it and drop it from every index.
    /// Idempotent; unknown ids are ignored.
    pub fn dispose_connection(&mut self, id: ConnId) {
        if let Some(mut conn) = self.conns.remove(&id) {
            conn.close();
            if self.by_addr.get(&conn.peer) == Some(&id) {
                self.by_addr.remove(&conn.peer);
            }
            trace!(conn = id.0, "disposed connection");
            return;
        }
        if let Some(mut conn) = self.pending.remove(&id) {
            conn.close();
            if self.by_addr.get(&conn.peer) == Some(&id) {
                self.by_addr.remove(&conn.peer);
            }
            self.accept_queue.retain(|&queued| queued != id);
            trace!(conn = id.0, "disposed pending connection");
        }
    }

    fn mint_id(&mut self) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        id
    }

    fn new_connection(
        &self,
        id: ConnId,
        peer: SocketAddrV4,
        handle: TransportHandle,
        now: Instant,
    ) -> Connection {
        Connection::new(
            id,
            peer,
            handle,
            self.settings.max_message_size,
            self.settings.queue_size,
            self.settings.max_message_count,
            now,
        )
    }

    /// Step 1 of the poll cycle: close idle peers, queue keepalives.
    fn sweep_timeouts(
        &mut self,
        active: &mut BTreeSet<ConnId>,
        notify_pending: &mut BTreeSet<ConnId>,
    ) {
        let now = self.now;
        let mut timed_out: Vec<ConnId> = Vec::new();
        for (&id, conn) in self.conns.iter_mut() {
            if conn.closed {
                continue;
            }
            if let Some(timeout) = self.settings.timeout {
                if now.duration_since(conn.last_active) > timeout {
                    timed_out.push(id);
                    continue;
                }
            }
            if let Some(keepalive) = self.settings.keepalive {
                if now.duration_since(conn.last_keepalive) > keepalive {
                    trace!(conn = id.0, "queueing keepalive");
                    // Full queue just means the keepalive rides a later poll.
                    let _ = conn.outgoing.put_message(&[]);
                }
            }
        }
        for id in timed_out {
            self.emit_report(
                Severity::Note,
                ErrorArea::Session,
                ErrorKind::PeerTimeout,
                Some(id),
                "connection idle past timeout",
            );
            if let Some(conn) = self.conns.get_mut(&id) {
                conn.close();
                if self.by_addr.get(&conn.peer) == Some(&id) {
                    self.by_addr.remove(&conn.peer);
                }
                if conn.accepted {
                    Self::mark_active(conn, id, active, notify_pending);
                }
            }
        }
    }

    /// Route a serviced connection to the active list or its notifier.
    fn mark_active(
        conn: &Connection,
        id: ConnId,
        active: &mut BTreeSet<ConnId>,
        notify_pending: &mut BTreeSet<ConnId>,
    ) {
        if conn.notifier.is_some() {
            notify_pending.insert(id);
        } else {
            active.insert(id);
        }
    }

    /// Accept one inbound stream connection into the pending queue.
    fn accept_inbound_stream(&mut self) -> bool {
        let Some(listener) = &self.listener else {
            return false;
        };
        match listener.accept() {
            Ok((stream, SocketAddr::V4(peer))) => {
                let _ = stream.set_nodelay(true);
                if let Err(err) = stream.set_nonblocking(true) {
                    let (severity, kind) = classify_os_error(&err);
                    emit(
                        &self.sink,
                        ErrorReport {
                            severity,
                            area: ErrorArea::Connect,
                            kind,
                            os_error: err.raw_os_error(),
                            conn: None,
                            message: Some("failed to prepare accepted stream".into()),
                        },
                    );
                    return false;
                }
                let id = ConnId(self.next_id);
                self.next_id += 1;
                let conn = self.new_connection(id, peer, TransportHandle::Stream(stream), self.now);
                self.pending.insert(id, conn);
                self.accept_queue.push_back(id);
                debug!(conn = id.0, peer = %peer, "admitted inbound stream");
                true
            }
            Ok((_, SocketAddr::V6(peer))) => {
                warn!(%peer, "dropping non-IPv4 inbound connection");
                false
            }
            Err(err) if err.kind() == IoKind::WouldBlock => false,
            Err(err) => {
                let (severity, kind) = classify_os_error(&err);
                emit(
                    &self.sink,
                    ErrorReport {
                        severity,
                        area: ErrorArea::Session,
                        kind,
                        os_error: err.raw_os_error(),
                        conn: None,
                        message: Some("accept() failed".into()),
                    },
                );
                false
            }
        }
    }

    /// Drain arrived datagrams from the bound socket, demultiplexing by
    /// source address. Runs until would-block.
    fn drive_datagram_read(
        &mut self,
        active: &mut BTreeSet<ConnId>,
        notify_pending: &mut BTreeSet<ConnId>,
    ) -> bool {
        let mut progress = false;
        let mut scratch = std::mem::take(&mut self.scratch);
        let now = self.now;
        loop {
            let Some(socket) = self.datagram.as_ref() else {
                break;
            };
            match socket.recv_from(&mut scratch) {
                Ok((len, SocketAddr::V4(from))) => {
                    progress = true;
                    if let Some(&id) = self.by_addr.get(&from) {
                        if let Some(conn) = self.conns.get_mut(&id) {
                            conn.last_active = now;
                            if conn.incoming.put_message(&scratch[..len]).is_err() {
                                emit(
                                    &self.sink,
                                    ErrorReport {
                                        severity: Severity::Warning,
                                        area: ErrorArea::Session,
                                        kind: ErrorKind::BufferFull,
                                        os_error: None,
                                        conn: Some(id),
                                        message: Some("dropping datagram, input queue full".into()),
                                    },
                                );
                            }
                            Self::mark_active(conn, id, active, notify_pending);
                        } else if let Some(conn) = self.pending.get_mut(&id) {
                            // Admitted but unclaimed: buffer quietly, no
                            // notifications until the user accepts.
                            conn.last_active = now;
                            let _ = conn.incoming.put_message(&scratch[..len]);
                        }
                    } else if self.settings.accepting {
                        let id = ConnId(self.next_id);
                        self.next_id += 1;
                        let conn = Connection::new(
                            id,
                            from,
                            TransportHandle::Datagram,
                            self.settings.max_message_size,
                            self.settings.queue_size,
                            self.settings.max_message_count,
                            now,
                        );
                        self.pending.insert(id, conn);
                        self.accept_queue.push_back(id);
                        self.by_addr.insert(from, id);
                        debug!(conn = id.0, peer = %from, "admitted datagram peer");
                        // Acknowledge so the connector's hello is answered.
                        // The acknowledgement itself may of course be lost.
                        if let Err(err) = socket.send_to(&[], from) {
                            let (severity, kind) = classify_os_error(&err);
                            emit(
                                &self.sink,
                                ErrorReport {
                                    severity,
                                    area: ErrorArea::Session,
                                    kind,
                                    os_error: err.raw_os_error(),
                                    conn: Some(id),
                                    message: Some("failed to acknowledge new peer".into()),
                                },
                            );
                        }
                    } else {
                        trace!(peer = %from, "dropping datagram from unknown peer");
                    }
                }
                Ok((_, SocketAddr::V6(_))) => {}
                Err(err) if err.kind() == IoKind::WouldBlock => break,
                Err(err) if err.kind() == IoKind::Interrupted => continue,
                Err(err) => {
                    let (severity, kind) = classify_os_error(&err);
                    emit(
                        &self.sink,
                        ErrorReport {
                            severity,
                            area: ErrorArea::Session,
                            kind,
                            os_error: err.raw_os_error(),
                            conn: None,
                            message: Some("recv_from() on datagram socket failed".into()),
                        },
                    );
                    break;
                }
            }
        }
        self.scratch = scratch;
        progress
    }

    /// Push queued datagrams out for every connection, one `send_to` per
    /// packet, until the kernel pushes back.
    ///
    /// Returns (moved anything, more still queued).
    fn drive_datagram_write(
        &mut self,
        active: &mut BTreeSet<ConnId>,
        notify_pending: &mut BTreeSet<ConnId>,
        max_active: usize,
    ) -> (bool, bool) {
        let mut progress = false;
        let mut scratch = std::mem::take(&mut self.scratch);
        let now = self.now;
        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        'conns: for id in ids {
            loop {
                let Some(conn) = self.conns.get_mut(&id) else {
                    break;
                };
                if !conn.wants_to_write() {
                    break;
                }
                let len = match conn.outgoing.get_message(&mut scratch) {
                    Ok(Some(len)) => len,
                    // Queued packets always fit the max-message scratch.
                    _ => break,
                };
                let peer = conn.peer;
                let Some(socket) = self.datagram.as_ref() else {
                    break 'conns;
                };
                match socket.send_to(&scratch[..len], peer) {
                    Ok(_) => {
                        conn.last_keepalive = now;
                        progress = true;
                        Self::mark_active(conn, id, active, notify_pending);
                        if active.len() >= max_active {
                            break 'conns;
                        }
                    }
                    Err(err) if err.kind() == IoKind::WouldBlock => {
                        // Kernel send buffer is full; try next poll.
                        break 'conns;
                    }
                    Err(err) => {
                        let (severity, kind) = classify_os_error(&err);
                        emit(
                            &self.sink,
                            ErrorReport {
                                severity,
                                area: ErrorArea::Session,
                                kind,
                                os_error: err.raw_os_error(),
                                conn: Some(id),
                                message: Some("send_to() failed".into()),
                            },
                        );
                        break 'conns;
                    }
                }
            }
        }
        self.scratch = scratch;
        let more = self.conns.values().any(|conn| conn.wants_to_write());
        (progress, more)
    }

    /// An error condition was reported on the listening / bound endpoint.
    fn handle_endpoint_error(&mut self) {
        let fd = self
            .listener
            .as_ref()
            .map(|listener| listener.as_raw_fd())
            .or_else(|| self.datagram.as_ref().map(|socket| socket.as_raw_fd()));
        let Some(fd) = fd else {
            return;
        };
        match take_socket_error(fd) {
            Ok(Some(err)) => {
                let (severity, kind) = classify_os_error(&err);
                emit(
                    &self.sink,
                    ErrorReport {
                        severity,
                        area: ErrorArea::Session,
                        kind,
                        os_error: err.raw_os_error(),
                        conn: None,
                        message: Some("endpoint error condition".into()),
                    },
                );
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%err, "failed to retrieve endpoint error");
            }
        }
    }

    /// An error condition was reported on a stream connection: retrieve,
    /// report, close.
    fn handle_stream_error(conn: &mut Connection, sink: &Option<Arc<dyn ErrorSink>>) {
        let pending = match &conn.handle {
            TransportHandle::Stream(stream) => {
                take_socket_error(stream.as_raw_fd()).ok().flatten()
            }
            _ => None,
        };
        let (severity, kind, os_error) = match &pending {
            Some(err) => {
                let (severity, kind) = classify_os_error(err);
                (severity, kind, err.raw_os_error())
            }
            None => (Severity::Warning, ErrorKind::UnknownError, None),
        };
        emit(
            sink,
            ErrorReport {
                severity,
                area: ErrorArea::Session,
                kind,
                os_error,
                conn: Some(conn.id),
                message: Some("stream error condition".into()),
            },
        );
        conn.close();
    }

    /// Grow the kernel send/receive buffers on the datagram socket as the
    /// connection count does, so bursts land in the kernel, not the floor.
    fn change_queuing_space(&mut self) {
        let Some(socket) = &self.datagram else {
            return;
        };
        let per_conn = self.settings.queue_size.max(MIN_KERNEL_QUEUE);
        let mut needed = ((1 + self.conns.len()) * per_conn).max(MIN_KERNEL_TOTAL);
        if needed <= self.cur_queue_space {
            return;
        }
        if self.settings.accepting {
            // Headroom for peers that connect before the next resize.
            needed += ACCEPT_HEADROOM * self.settings.queue_size;
        }
        match set_queue_buffers(socket, needed) {
            Ok(()) => self.cur_queue_space = needed,
            Err(err) => self.emit_transport(ErrorArea::Init, &err, None),
        }
    }

    fn note_default(sink: &Option<Arc<dyn ErrorSink>>, field: &str, value: usize) {
        emit(
            sink,
            ErrorReport {
                severity: Severity::Note,
                area: ErrorArea::Init,
                kind: ErrorKind::NoError,
                os_error: None,
                conn: None,
                message: Some(format!("defaulting {field} to {value}")),
            },
        );
    }

    fn reject_settings(sink: &Option<Arc<dyn ErrorSink>>, reason: &str) -> SessionError {
        emit(
            sink,
            ErrorReport {
                severity: Severity::Error,
                area: ErrorArea::Init,
                kind: ErrorKind::InvalidParameters,
                os_error: None,
                conn: None,
                message: Some(reason.to_string()),
            },
        );
        SessionError::InvalidSettings(reason.to_string())
    }

    fn reject_transport(
        sink: &Option<Arc<dyn ErrorSink>>,
        area: ErrorArea,
        err: sockmux_transport::TransportError,
    ) -> SessionError {
        let (severity, kind, os_error) = match err.io_source() {
            Some(io) => {
                let (severity, kind) = classify_os_error(io);
                (severity, kind, io.raw_os_error())
            }
            None => (Severity::Error, ErrorKind::BadAddress, None),
        };
        emit(
            sink,
            ErrorReport {
                severity,
                area,
                kind,
                os_error,
                conn: None,
                message: Some(err.to_string()),
            },
        );
        err.into()
    }

    fn emit_transport(
        &self,
        area: ErrorArea,
        err: &sockmux_transport::TransportError,
        conn: Option<ConnId>,
    ) {
        let (severity, kind, os_error) = match err.io_source() {
            Some(io) => {
                let (severity, kind) = classify_os_error(io);
                (severity, kind, io.raw_os_error())
            }
            None => (Severity::Error, ErrorKind::BadAddress, None),
        };
        emit(
            &self.sink,
            ErrorReport {
                severity,
                area,
                kind,
                os_error,
                conn,
                message: Some(err.to_string()),
            },
        );
    }

    fn emit_report(
        &self,
        severity: Severity,
        area: ErrorArea,
        kind: ErrorKind,
        conn: Option<ConnId>,
        message: &str,
    ) {
        emit(
            &self.sink,
            ErrorReport {
                severity,
                area,
                kind,
                os_error: None,
                conn,
                message: Some(message.to_string()),
            },
        );
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        let live = self.live_connections() + self.pending.len();
        if live > 0 {
            warn!(live, "socket manager dropped with live connections");
            self.emit_report(
                Severity::Internal,
                ErrorArea::Dispose,
                ErrorKind::InternalError,
                None,
                "manager dropped while connections are live",
            );
            if self.settings.debug {
                debug_assert!(false, "manager dropped with {live} live connections");
            }
        }
    }
}

/// Pull bytes from the OS into the connection's input queue.
/// Returns whether anything happened (bytes arrived or the peer closed).
fn drive_stream_read(
    conn: &mut Connection,
    scratch: &mut [u8],
    now: Instant,
    sink: &Option<Arc<dyn ErrorSink>>,
) -> bool {
    let TransportHandle::Stream(stream) = &mut conn.handle else {
        return false;
    };
    match stream.read(scratch) {
        Ok(0) => {
            debug!(conn = conn.id.0, "peer closed stream");
            conn.close();
            true
        }
        Ok(len) => {
            conn.last_active = now;
            conn.incoming.put_data(&scratch[..len]);
            true
        }
        Err(err) if matches!(err.kind(), IoKind::WouldBlock | IoKind::Interrupted) => false,
        Err(err) => {
            let (severity, kind) = classify_os_error(&err);
            emit(
                sink,
                ErrorReport {
                    severity,
                    area: ErrorArea::Session,
                    kind,
                    os_error: err.raw_os_error(),
                    conn: Some(conn.id),
                    message: Some("recv() failed".into()),
                },
            );
            conn.close();
            false
        }
    }
}

/// Push queued wire bytes to the OS, carrying any unsent suffix to the
/// next attempt. Returns whether at least one byte moved.
fn drive_stream_write(
    conn: &mut Connection,
    now: Instant,
    sink: &Option<Arc<dyn ErrorSink>>,
) -> bool {
    if conn.carry_len == 0 {
        match conn.outgoing.get_data(&mut conn.carry) {
            Ok(len) => conn.carry_len = len,
            Err(_) => return false,
        }
    }
    if conn.carry_len == 0 {
        return false;
    }
    let TransportHandle::Stream(stream) = &mut conn.handle else {
        return false;
    };
    match stream.write(&conn.carry[..conn.carry_len]) {
        Ok(0) => {
            conn.close();
            false
        }
        Ok(sent) => {
            if sent < conn.carry_len {
                conn.carry.copy_within(sent..conn.carry_len, 0);
            }
            conn.carry_len -= sent;
            conn.last_keepalive = now;
            true
        }
        Err(err) if matches!(err.kind(), IoKind::WouldBlock | IoKind::Interrupted) => false,
        Err(err) => {
            let (severity, kind) = classify_os_error(&err);
            emit(
                sink,
                ErrorReport {
                    severity,
                    area: ErrorArea::Session,
                    kind,
                    os_error: err.raw_os_error(),
                    conn: Some(conn.id),
                    message: Some("send() failed".into()),
                },
            );
            conn.close();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreliable(port: u16, accepting: bool) -> Settings {
        Settings {
            port,
            reliable: false,
            accepting,
            ..Settings::default()
        }
    }

    #[test]
    fn open_rejects_accepting_port_zero() {
        let settings = Settings {
            accepting: true,
            port: 0,
            ..Settings::default()
        };
        assert!(matches!(
            SocketManager::open(settings),
            Err(SessionError::InvalidSettings(_))
        ));
    }

    #[test]
    fn open_rejects_future_protocol_version() {
        let settings = Settings {
            version: SUPPORTED_VERSION + 1,
            ..Settings::default()
        };
        assert!(matches!(
            SocketManager::open(settings),
            Err(SessionError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn open_rejects_oversized_queue_budget() {
        let settings = Settings {
            queue_size: 65_000,
            max_message_size: 1400,
            ..Settings::default()
        };
        assert!(matches!(
            SocketManager::open(settings),
            Err(SessionError::InvalidSettings(_))
        ));
    }

    #[test]
    fn open_applies_documented_defaults() {
        let manager = SocketManager::open(Settings::default()).unwrap();
        let settings = manager.settings();
        assert_eq!(settings.max_message_size, 1400);
        assert_eq!(settings.max_message_count, 50);
        assert_eq!(settings.queue_size, 4000);
    }

    #[test]
    fn unreliable_client_binds_ephemeral_port() {
        let manager = SocketManager::open(unreliable(0, false)).unwrap();
        assert!(manager.local_port().is_some());
        assert_ne!(manager.local_port(), Some(0));
    }

    #[test]
    fn reliable_client_has_no_endpoint_until_connect() {
        let manager = SocketManager::open(Settings::default()).unwrap();
        assert_eq!(manager.local_port(), None);
    }

    #[test]
    fn connect_failure_reports_and_errors() {
        let mut manager = SocketManager::open(Settings::default()).unwrap();
        assert!(manager.connect("host.invalid", 9).is_err());
        assert_eq!(manager.live_connections(), 0);
    }

    #[test]
    fn dispose_is_idempotent_for_unknown_ids() {
        let mut manager = SocketManager::open(Settings::default()).unwrap();
        manager.dispose_connection(ConnId(77));
        manager.dispose_connection(ConnId(77));
    }

    #[test]
    fn poll_requires_room_for_an_active_connection() {
        let mut manager = SocketManager::open(Settings::default()).unwrap();
        let mut active = Vec::new();
        assert!(manager
            .poll(Duration::ZERO, &mut active, 0)
            .is_err());
    }

    #[test]
    fn manager_moves_to_its_owning_thread() {
        fn assert_send<T: Send>() {}
        // One manager per thread is the supported concurrency model.
        assert_send::<SocketManager>();
    }

    #[test]
    fn unreliable_connect_queues_hello_and_indexes_address() {
        let server = SocketManager::open(unreliable(0, false)).unwrap();
        let port = server.local_port().unwrap();

        let mut client = SocketManager::open(unreliable(0, false)).unwrap();
        let id = client.connect("127.0.0.1", port).unwrap();
        let conn = client.connection(id).unwrap();
        assert_eq!(conn.peer_addr().port(), port);
        // The zero-length hello is queued, awaiting the first poll.
        assert!(conn.outgoing.message_count() == 1);
        client.dispose_connection(id);
    }
}
