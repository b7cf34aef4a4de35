//! Connection management for sockmux.
//!
//! This is the "just works" layer. A [`SocketManager`] owns one listening or
//! bound endpoint plus a table of [`Connection`]s, and a single call to
//! [`SocketManager::poll`] services all of them: accepting inbound peers,
//! moving queued packets to and from the operating system, generating
//! keepalives and enforcing idle timeouts.
//!
//! `Connection::read` and `Connection::write` only touch the in-memory
//! packet queues — every system call happens inside `poll`. A manager and
//! its connections belong to one thread; run one manager per thread if you
//! need more.

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod report;

pub use config::{Settings, SUPPORTED_VERSION};
pub use connection::{ConnId, Connection};
pub use error::{Result, SessionError};
pub use manager::SocketManager;
pub use report::{
    set_default_error_sink, ErrorArea, ErrorKind, ErrorReport, ErrorSink, Severity,
};
