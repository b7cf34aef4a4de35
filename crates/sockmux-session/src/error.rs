use crate::connection::ConnId;

/// Errors surfaced by the session API.
///
/// Flow-control conditions carry their own variants so callers can react:
/// [`QueueFull`](SessionError::QueueFull) means "retry after the next poll",
/// [`Truncated`](SessionError::Truncated) means "retry with a bigger
/// buffer". Everything richer goes through the error sink.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The settings are inconsistent (port 0 on a server, queue budget
    /// overflowing the wire length field, ...).
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The requested wire-protocol version is newer than this build.
    #[error("requested protocol version {requested}, supported {supported}")]
    UnsupportedVersion { requested: u32, supported: u32 },

    /// Transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[from] sockmux_transport::TransportError),

    /// The outgoing queue has no room for the packet; try again after the
    /// next poll has drained some of it.
    #[error("output queue full")]
    QueueFull,

    /// The packet exceeds the configured maximum message size.
    #[error("packet too large ({size} bytes, max {max})")]
    Oversized { size: usize, max: usize },

    /// The pending packet does not fit the caller's buffer; it is retained.
    #[error("packet of {size} bytes does not fit buffer of {max}")]
    Truncated { size: usize, max: usize },

    /// The connection id is not (or no longer) known to this manager.
    #[error("unknown connection {0:?}")]
    UnknownConnection(ConnId),

    /// The connection is closed; no more data will move.
    #[error("connection closed")]
    Closed,

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = std::result::Result<T, SessionError>;
