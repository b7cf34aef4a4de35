//! The categorized error model and the pluggable error sink.
//!
//! API calls report failures through `Result` values; this module is the
//! richer diagnostic channel that runs alongside them. Every noteworthy
//! event inside a manager — a peer timing out, a full queue, a refused
//! connect — is classified into (severity, area, kind) and delivered to an
//! [`ErrorSink`]: the manager's own sink if one was configured, otherwise
//! the process-wide default installed with [`set_default_error_sink`].

use std::sync::{Arc, RwLock};

use tracing::{debug, error, warn};

use crate::connection::ConnId;

/// How bad an error is. Higher is worse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Can be ignored.
    Note,
    /// Worked around by the library.
    Warning,
    /// Can be worked around by user code.
    Error,
    /// Cannot be recovered from.
    Catastrophe,
    /// Internal to the library.
    Internal,
}

/// Where in the library life cycle an error comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorArea {
    Init,
    Address,
    Connect,
    Buffer,
    Session,
    Dispose,
    Unknown,
}

/// What a specific error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NoError,
    UnknownError,
    /// The requested wire-protocol version is newer than this build.
    UnsupportedVersion,
    UnsupportedPlatform,
    /// Queue smaller than the max message, port 0 on a server, and so on.
    InvalidParameters,
    /// Out of queuing space; messages dropped.
    BufferFull,
    /// Underlying infrastructure failure: sockets, memory, descriptors.
    OutOfResources,
    BadAddress,
    AlreadyInUse,
    PeerRefused,
    PeerDropped,
    PeerTimeout,
    /// The peer is violating the framing protocol.
    PeerViolation,
    InternalError,
}

/// One diagnostic event delivered to an [`ErrorSink`].
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub severity: Severity,
    pub area: ErrorArea,
    pub kind: ErrorKind,
    /// The underlying OS errno, when one exists.
    pub os_error: Option<i32>,
    /// The connection the error originated from, when known.
    pub conn: Option<ConnId>,
    /// Free-text detail.
    pub message: Option<String>,
}

/// Receives [`ErrorReport`]s.
///
/// A sink may be shared between managers running on different threads, so
/// implementations must be thread-safe.
pub trait ErrorSink: Send + Sync {
    fn on_error(&self, report: &ErrorReport);
}

static DEFAULT_SINK: RwLock<Option<Arc<dyn ErrorSink>>> = RwLock::new(None);

/// Install (or clear, with `None`) the process-wide default error sink.
///
/// The default sink receives reports from every manager that does not carry
/// its own sink, and from failures with no manager to blame.
pub fn set_default_error_sink(sink: Option<Arc<dyn ErrorSink>>) {
    if let Ok(mut slot) = DEFAULT_SINK.write() {
        *slot = sink;
    }
}

pub(crate) fn default_error_sink() -> Option<Arc<dyn ErrorSink>> {
    DEFAULT_SINK.read().ok().and_then(|slot| slot.clone())
}

/// Deliver a report to the given sink, falling back to the process default,
/// and mirror it into the tracing stream.
pub(crate) fn emit(sink: &Option<Arc<dyn ErrorSink>>, report: ErrorReport) {
    match report.severity {
        Severity::Note => debug!(?report.area, ?report.kind, msg = report.message.as_deref(), "session note"),
        Severity::Warning => warn!(?report.area, ?report.kind, msg = report.message.as_deref(), "session warning"),
        _ => error!(?report.area, ?report.kind, os_error = report.os_error, msg = report.message.as_deref(), "session error"),
    }
    if let Some(sink) = sink.as_ref().cloned().or_else(default_error_sink) {
        sink.on_error(&report);
    }
}

/// Classify an OS-level I/O error into the model.
///
/// Recoverable conditions (would-block, interrupted, in-progress) are
/// classified as warnings; the transport drivers absorb them before they
/// ever reach a sink.
pub(crate) fn classify_os_error(err: &std::io::Error) -> (Severity, ErrorKind) {
    use std::io::ErrorKind as Io;
    match err.kind() {
        Io::WouldBlock | Io::Interrupted => (Severity::Warning, ErrorKind::NoError),
        Io::ConnectionRefused => (Severity::Error, ErrorKind::PeerRefused),
        Io::ConnectionReset | Io::BrokenPipe => (Severity::Warning, ErrorKind::PeerDropped),
        Io::ConnectionAborted | Io::TimedOut => (Severity::Warning, ErrorKind::PeerTimeout),
        Io::AddrInUse => (Severity::Error, ErrorKind::AlreadyInUse),
        Io::AddrNotAvailable | Io::InvalidInput => (Severity::Error, ErrorKind::InvalidParameters),
        Io::PermissionDenied => (Severity::Error, ErrorKind::AlreadyInUse),
        Io::NotFound => (Severity::Error, ErrorKind::BadAddress),
        Io::OutOfMemory => (Severity::Catastrophe, ErrorKind::OutOfResources),
        _ => (Severity::Error, ErrorKind::UnknownError),
    }
}
