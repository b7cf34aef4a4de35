use std::net::SocketAddrV4;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create or bind a socket on the given port.
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        source: std::io::Error,
    },

    /// Failed to connect a stream socket to the given address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddrV4,
        source: std::io::Error,
    },

    /// Name resolution failed for the given host.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    /// The host resolved, but not to any IPv4 address.
    #[error("no IPv4 address for host {host}")]
    NoIpv4Address { host: String },

    /// The readiness selector failed.
    #[error("readiness poll failed: {0}")]
    Poll(std::io::Error),

    /// An I/O error on a transport socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The underlying OS error, when one exists.
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            Self::Bind { source, .. }
            | Self::Connect { source, .. }
            | Self::Resolve { source, .. } => Some(source),
            Self::Poll(source) | Self::Io(source) => Some(source),
            Self::NoIpv4Address { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
