//! Wire header layout.
//!
//! ```text
//! ┌────────────────┬──────────────────┐
//! │ Length (2B BE) │ Payload          │
//! │ 0..=65535      │ (Length bytes)   │
//! └────────────────┴──────────────────┘
//! ```
//!
//! There is no magic number and no channel id: the stream carrying these
//! frames is already connection-scoped, and a zero-length frame is a valid
//! keepalive, so every two-byte header is meaningful.

/// Frame header: payload length (2 bytes, big-endian).
pub const HEADER_SIZE: usize = 2;

/// Largest payload representable in the two-byte length header.
pub const MAX_WIRE_PAYLOAD: usize = u16::MAX as usize;

/// Encode a payload length into its wire header.
///
/// Callers must have validated `len <= MAX_WIRE_PAYLOAD`; buffer budgets in
/// this crate are all well below it.
pub fn encode_header(len: usize) -> [u8; HEADER_SIZE] {
    debug_assert!(len <= MAX_WIRE_PAYLOAD);
    (len as u16).to_be_bytes()
}

/// Combine the two header bytes into a payload length.
///
/// The high byte is shifted explicitly; the low byte is OR-ed in. This is
/// also how the incremental parser combines a header that arrived split
/// across two reads.
pub fn decode_header(high: u8, low: u8) -> usize {
    ((high as usize) << 8) | low as usize
}
