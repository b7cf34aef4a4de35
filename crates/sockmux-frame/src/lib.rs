//! Length-prefixed message framing for sockmux.
//!
//! Every logical packet on a stream transport is framed as:
//! - A 2-byte big-endian payload length
//! - The payload itself (zero-length payloads are legal keepalives)
//!
//! [`FramedBuffer`] is the core type: a bounded FIFO of whole packets that
//! can be fed from either side of the framing boundary. Feed it raw stream
//! bytes with `put_data` and pull whole packets with `get_message`, or queue
//! whole packets with `put_message` and drain wire bytes with `get_data`.
//! Partial headers and partial payloads are handled internally.

pub mod buffer;
pub mod codec;
pub mod error;

pub use buffer::FramedBuffer;
pub use codec::{decode_header, encode_header, HEADER_SIZE, MAX_WIRE_PAYLOAD};
pub use error::{FrameError, Result};
