//! Non-blocking IPv4 socket primitives for sockmux.
//!
//! This is the lowest layer of the workspace: it owns every direct
//! interaction with the operating system's socket API. It provides
//! - constructors for non-blocking listening, datagram and connected
//!   stream sockets ([`socket`]),
//! - a readiness selector over a set of descriptors ([`poll::PollSet`]),
//! - blocking IPv4 name resolution.
//!
//! Everything above this crate works in terms of `std::net` socket types
//! that have already been switched to non-blocking mode.

pub mod error;
pub mod poll;
pub mod socket;

pub use error::{Result, TransportError};
pub use poll::{PollSet, Readiness};
pub use socket::{
    bind_datagram, connect_stream, listen_stream, resolve_host_v4, set_queue_buffers,
    take_socket_error,
};
