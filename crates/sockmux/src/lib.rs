//! Message-framed socket multiplexing with a packet ("one write in, one
//! read out") abstraction over both TCP and UDP, plus a compact
//! fixed-schema marshalling engine.
//!
//! This crate re-exports the public surface of the workspace:
//! - [`SocketManager`] / [`Connection`]: the readiness-polled session layer
//!   ([`sockmux_session`]),
//! - [`FramedBuffer`]: the length-prefixed packet queue underneath it
//!   ([`sockmux_frame`]),
//! - [`MarshalRegistry`] / [`Block`]: typed record marshalling
//!   ([`sockmux_marshal`]),
//! - the socket and readiness primitives ([`sockmux_transport`]).
//!
//! ## A minimal server
//!
//! ```no_run
//! use std::time::Duration;
//! use sockmux::{Settings, SocketManager};
//!
//! let mut manager = SocketManager::open(Settings {
//!     port: 11_147,
//!     accepting: true,
//!     ..Settings::default()
//! })?;
//!
//! let mut active = Vec::new();
//! let mut buf = [0u8; 1400];
//! loop {
//!     manager.poll(Duration::from_millis(16), &mut active, 16)?;
//!     for id in manager.accept(16) {
//!         println!("new peer: {}", manager.connection(id).unwrap().peer_addr());
//!     }
//!     for &id in &active {
//!         let conn = manager.connection_mut(id).unwrap();
//!         while let Some(len) = conn.read(&mut buf)? {
//!             if len > 0 {
//!                 conn.write(&buf[..len])?; // echo
//!             }
//!         }
//!     }
//! }
//! # #[allow(unreachable_code)]
//! # Ok::<(), sockmux::SessionError>(())
//! ```

pub use sockmux_frame::{FrameError, FramedBuffer};
pub use sockmux_marshal::{
    Block, FieldKind, MarshalError, MarshalRegistry, Record, TypeDef, Value,
};
pub use sockmux_session::{
    set_default_error_sink, ConnId, Connection, ErrorArea, ErrorKind, ErrorReport, ErrorSink,
    SessionError, Settings, Severity, SocketManager, SUPPORTED_VERSION,
};
pub use sockmux_transport::TransportError;
