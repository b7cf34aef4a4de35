use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::codec::{decode_header, encode_header, HEADER_SIZE};
use crate::error::{FrameError, Result};

/// Minimum output slice for [`FramedBuffer::get_data`]: one whole header
/// plus at least one payload byte of forward progress.
const MIN_DRAIN_OUT: usize = HEADER_SIZE + 1;

/// A packet queued for draining, with its wire-serialization progress.
struct QueuedFrame {
    payload: Bytes,
    /// Whether the two header bytes have been emitted by `get_data`.
    header_sent: bool,
    /// Payload bytes already emitted by `get_data`.
    drained: usize,
}

impl QueuedFrame {
    fn new(payload: Bytes) -> Self {
        Self {
            payload,
            header_sent: false,
            drained: 0,
        }
    }
}

/// Incremental parser state for raw stream input.
///
/// Headers may arrive split across reads, so the high-byte-only case is a
/// distinct state rather than a peek.
enum ParseState {
    /// Waiting for the high byte of the next length header.
    HeaderHigh,
    /// Got the high byte (stored pre-shifted); waiting for the low byte.
    HeaderLow { high: usize },
    /// Assembling a packet body of `want` bytes.
    Filling { body: BytesMut, want: usize },
    /// Consuming the body of a packet that exceeded a budget.
    Skipping { left: usize },
}

/// A bounded FIFO of framed packets.
///
/// Feed one side and drain the other:
/// - `put_message` + `get_data`: queue whole packets, drain wire bytes
///   (the outgoing direction of a connection);
/// - `put_data` + `get_message`: feed raw stream bytes, pull whole packets
///   (the incoming direction).
///
/// Mixing both put styles (or both get styles) on one buffer is not
/// supported.
///
/// Three caps bound the queue: the largest acceptable single packet, the
/// total queued payload bytes, and the number of queued packets. Incoming
/// packets that violate a cap are consumed from the stream and dropped.
pub struct FramedBuffer {
    max_message: usize,
    queue_bytes: usize,
    max_messages: usize,

    queue: VecDeque<QueuedFrame>,
    /// Payload bytes held by finished packets (framing excluded).
    used: usize,
    state: ParseState,
}

impl FramedBuffer {
    /// Create a buffer bounded by a maximum packet size, a total payload
    /// byte budget, and a packet count limit.
    ///
    /// `queue_bytes` ought to be at least twice `max_message`.
    pub fn new(max_message: usize, queue_bytes: usize, max_messages: usize) -> Self {
        Self {
            max_message,
            queue_bytes,
            max_messages,
            queue: VecDeque::new(),
            used: 0,
            state: ParseState::HeaderHigh,
        }
    }

    /// Payload bytes currently queued in finished packets.
    pub fn space_used(&self) -> usize {
        self.used
    }

    /// Whole packets currently queued (the in-progress packet excluded).
    pub fn message_count(&self) -> usize {
        self.queue.len()
    }

    /// Whether a packet of `size` bytes could be queued right now.
    pub fn can_accept(&self, size: usize) -> bool {
        size <= self.max_message
            && self.queue.len() < self.max_messages
            && self.used + size <= self.queue_bytes
    }

    /// Enqueue one whole packet, making it atomically visible to
    /// [`get_message`](Self::get_message).
    ///
    /// Zero-length packets are legal (keepalives) and still count against
    /// the packet count cap.
    pub fn put_message(&mut self, payload: &[u8]) -> Result<usize> {
        self.check_caps(payload.len())?;
        self.queue
            .push_back(QueuedFrame::new(Bytes::copy_from_slice(payload)));
        self.used += payload.len();
        Ok(payload.len())
    }

    /// Feed a run of raw wire bytes, advancing the incremental parser.
    ///
    /// All input is consumed; returns the number of bytes consumed. Packets
    /// whose declared length violates a cap are skipped: their bytes are
    /// consumed from the stream but no packet becomes visible.
    pub fn put_data(&mut self, mut data: &[u8]) -> usize {
        let total = data.len();
        while !data.is_empty() {
            match &mut self.state {
                ParseState::HeaderHigh => {
                    if data.len() == 1 {
                        self.state = ParseState::HeaderLow {
                            high: (data[0] as usize) << 8,
                        };
                        data = &data[1..];
                    } else {
                        let len = decode_header(data[0], data[1]);
                        data = &data[2..];
                        self.begin_frame(len);
                    }
                }
                ParseState::HeaderLow { high } => {
                    let len = *high | data[0] as usize;
                    data = &data[1..];
                    self.begin_frame(len);
                }
                ParseState::Filling { body, want } => {
                    let take = (*want - body.len()).min(data.len());
                    body.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if body.len() == *want {
                        let payload = std::mem::take(body).freeze();
                        self.used += payload.len();
                        self.queue.push_back(QueuedFrame::new(payload));
                        self.state = ParseState::HeaderHigh;
                    }
                }
                ParseState::Skipping { left } => {
                    let skip = (*left).min(data.len());
                    *left -= skip;
                    data = &data[skip..];
                    if *left == 0 {
                        self.state = ParseState::HeaderHigh;
                    }
                }
            }
        }
        total
    }

    /// Dequeue the next whole packet into `out`.
    ///
    /// Returns `Ok(None)` when no packet is pending. A pending packet larger
    /// than `out` fails with [`FrameError::Truncated`] and is retained.
    /// `Ok(Some(0))` is a zero-length keepalive.
    pub fn get_message(&mut self, out: &mut [u8]) -> Result<Option<usize>> {
        let Some(frame) = self.queue.pop_front() else {
            return Ok(None);
        };
        let size = frame.payload.len();
        if size > out.len() {
            self.queue.push_front(frame);
            return Err(FrameError::Truncated {
                size,
                max: out.len(),
            });
        }
        out[..size].copy_from_slice(&frame.payload);
        self.used -= size;
        Ok(Some(size))
    }

    /// Serialize queued packets back into wire form.
    ///
    /// `out` must be at least 3 bytes so every call makes forward progress.
    /// A packet that does not fully fit is left mid-drain; the next call
    /// resumes from the same payload position. Returns the bytes written
    /// (zero when the queue is empty).
    pub fn get_data(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.len() < MIN_DRAIN_OUT {
            return Err(FrameError::OutputTooSmall { min: MIN_DRAIN_OUT });
        }
        let mut total = 0;
        while let Some(front) = self.queue.front_mut() {
            if out.len() - total < MIN_DRAIN_OUT {
                break;
            }
            if !front.header_sent {
                out[total..total + HEADER_SIZE]
                    .copy_from_slice(&encode_header(front.payload.len()));
                total += HEADER_SIZE;
                front.header_sent = true;
            }
            let want = front.payload.len() - front.drained;
            let take = want.min(out.len() - total);
            out[total..total + take]
                .copy_from_slice(&front.payload[front.drained..front.drained + take]);
            front.drained += take;
            total += take;
            if front.drained == front.payload.len() {
                self.used -= front.payload.len();
                self.queue.pop_front();
            } else {
                break;
            }
        }
        Ok(total)
    }

    fn check_caps(&self, size: usize) -> Result<()> {
        if size > self.max_message {
            return Err(FrameError::Oversized {
                size,
                max: self.max_message,
            });
        }
        if self.queue.len() >= self.max_messages {
            return Err(FrameError::TooManyMessages {
                max: self.max_messages,
            });
        }
        if self.used + size > self.queue_bytes {
            return Err(FrameError::QueueFull {
                queued: self.used,
                budget: self.queue_bytes,
            });
        }
        Ok(())
    }

    /// Transition out of the header states once a full length is known.
    fn begin_frame(&mut self, len: usize) {
        if self.check_caps(len).is_err() {
            warn!(len, "skipping framed packet that exceeds queue budget");
            if len == 0 {
                // A zero-length frame has no body to skip.
                self.state = ParseState::HeaderHigh;
            } else {
                self.state = ParseState::Skipping { left: len };
            }
            return;
        }
        if len == 0 {
            trace!("queueing zero-length keepalive packet");
            self.queue.push_back(QueuedFrame::new(Bytes::new()));
            self.state = ParseState::HeaderHigh;
        } else {
            self.state = ParseState::Filling {
                body: BytesMut::with_capacity(len),
                want: len,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_packets_roundtrip_through_wire_form() {
        let mut buf = FramedBuffer::new(1000, 3000, 10);
        assert_eq!(buf.put_message(b"hello, world!").unwrap(), 13);
        assert_eq!(buf.put_message(b"1234567890").unwrap(), 10);
        assert_eq!(buf.space_used(), 23);
        assert_eq!(buf.message_count(), 2);

        let mut wire = [0u8; 100];
        let n = buf.get_data(&mut wire).unwrap();
        assert_eq!(n, 27);
        assert_eq!(buf.space_used(), 0);
        assert_eq!(&wire[..2], &[0x00, 0x0d]);
        assert_eq!(&wire[2..15], b"hello, world!");
        assert_eq!(&wire[15..17], &[0x00, 0x0a]);
        assert_eq!(&wire[17..27], b"1234567890");

        let mut back = FramedBuffer::new(1000, 3000, 10);
        assert_eq!(back.put_data(&wire[..n]), n);
        assert_eq!(back.message_count(), 2);
        assert_eq!(back.space_used(), 23);

        let mut out = [0u8; 100];
        assert_eq!(back.get_message(&mut out).unwrap(), Some(13));
        assert_eq!(&out[..13], b"hello, world!");
        assert_eq!(back.get_message(&mut out).unwrap(), Some(10));
        assert_eq!(&out[..10], b"1234567890");
        assert_eq!(back.get_message(&mut out).unwrap(), None);
    }

    #[test]
    fn caps_reject_oversized_and_track_space() {
        let mut buf = FramedBuffer::new(10, 20, 5);
        assert_eq!(buf.put_message(b"1234567890").unwrap(), 10);
        assert_eq!(buf.put_message(b"").unwrap(), 0);
        assert!(matches!(
            buf.put_message(b"1234567890-"),
            Err(FrameError::Oversized { size: 11, max: 10 })
        ));
        assert_eq!(buf.space_used(), 10);
        assert_eq!(buf.message_count(), 2);
    }

    #[test]
    fn byte_budget_and_count_cap_enforced() {
        let mut buf = FramedBuffer::new(10, 15, 5);
        buf.put_message(b"1234567890").unwrap();
        assert!(matches!(
            buf.put_message(b"123456"),
            Err(FrameError::QueueFull { .. })
        ));

        let mut buf = FramedBuffer::new(10, 1000, 2);
        buf.put_message(b"a").unwrap();
        buf.put_message(b"b").unwrap();
        assert!(matches!(
            buf.put_message(b"c"),
            Err(FrameError::TooManyMessages { max: 2 })
        ));
    }

    #[test]
    fn parse_is_chunking_independent() {
        let mut reference = FramedBuffer::new(100, 1000, 10);
        reference.put_message(b"first").unwrap();
        reference.put_message(b"").unwrap();
        reference.put_message(b"second message").unwrap();
        let mut wire = [0u8; 256];
        let n = reference.get_data(&mut wire).unwrap();

        // Feed the identical stream one byte at a time.
        let mut dripped = FramedBuffer::new(100, 1000, 10);
        for byte in &wire[..n] {
            assert_eq!(dripped.put_data(std::slice::from_ref(byte)), 1);
        }

        // And in a few ragged chunks.
        let mut chunked = FramedBuffer::new(100, 1000, 10);
        chunked.put_data(&wire[..3]);
        chunked.put_data(&wire[3..4]);
        chunked.put_data(&wire[4..n]);

        for buf in [&mut dripped, &mut chunked] {
            let mut out = [0u8; 100];
            assert_eq!(buf.get_message(&mut out).unwrap(), Some(5));
            assert_eq!(&out[..5], b"first");
            assert_eq!(buf.get_message(&mut out).unwrap(), Some(0));
            assert_eq!(buf.get_message(&mut out).unwrap(), Some(14));
            assert_eq!(&out[..14], b"second message");
            assert_eq!(buf.get_message(&mut out).unwrap(), None);
        }
    }

    #[test]
    fn header_split_across_reads() {
        let mut buf = FramedBuffer::new(1000, 3000, 10);
        // Length 0x0103 = 259, split between the two header bytes.
        buf.put_data(&[0x01]);
        assert_eq!(buf.message_count(), 0);
        buf.put_data(&[0x03]);
        let body = vec![0xAB; 259];
        buf.put_data(&body);
        assert_eq!(buf.message_count(), 1);
        let mut out = vec![0u8; 300];
        assert_eq!(buf.get_message(&mut out).unwrap(), Some(259));
        assert_eq!(&out[..259], body.as_slice());
    }

    #[test]
    fn oversized_incoming_packet_is_skipped_silently() {
        let mut buf = FramedBuffer::new(10, 20, 5);
        // 12-byte packet exceeds max_message: consumed but never queued.
        let mut wire = Vec::from(encode_header(12));
        wire.extend_from_slice(b"0123456789AB");
        wire.extend_from_slice(&encode_header(3));
        wire.extend_from_slice(b"xyz");
        assert_eq!(buf.put_data(&wire), wire.len());
        assert_eq!(buf.message_count(), 1);
        let mut out = [0u8; 10];
        assert_eq!(buf.get_message(&mut out).unwrap(), Some(3));
        assert_eq!(&out[..3], b"xyz");
    }

    #[test]
    fn skip_state_survives_chunk_boundaries() {
        let mut buf = FramedBuffer::new(4, 20, 5);
        let mut wire = Vec::from(encode_header(8));
        wire.extend_from_slice(b"ABCDEFGH");
        wire.extend_from_slice(&encode_header(2));
        wire.extend_from_slice(b"ok");
        for chunk in wire.chunks(3) {
            buf.put_data(chunk);
        }
        assert_eq!(buf.message_count(), 1);
        let mut out = [0u8; 4];
        assert_eq!(buf.get_message(&mut out).unwrap(), Some(2));
        assert_eq!(&out[..2], b"ok");
    }

    #[test]
    fn undersized_read_retains_packet() {
        let mut buf = FramedBuffer::new(100, 1000, 10);
        buf.put_message(b"1234567890").unwrap();
        let mut small = [0u8; 9];
        assert!(matches!(
            buf.get_message(&mut small),
            Err(FrameError::Truncated { size: 10, max: 9 })
        ));
        assert_eq!(buf.space_used(), 10);
        let mut big = [0u8; 10];
        assert_eq!(buf.get_message(&mut big).unwrap(), Some(10));
        assert_eq!(buf.space_used(), 0);
    }

    #[test]
    fn wire_drain_resumes_mid_packet() {
        let mut buf = FramedBuffer::new(100, 1000, 10);
        buf.put_message(b"abcdefghij").unwrap();
        buf.put_message(b"KL").unwrap();

        let mut first = [0u8; 6];
        assert_eq!(buf.get_data(&mut first).unwrap(), 6);
        assert_eq!(&first[..2], &encode_header(10));
        assert_eq!(&first[2..6], b"abcd");
        // Still counted until the packet fully drains.
        assert_eq!(buf.space_used(), 12);

        let mut rest = [0u8; 64];
        let n = buf.get_data(&mut rest).unwrap();
        assert_eq!(n, 6 + 2 + 2);
        assert_eq!(&rest[..6], b"efghij");
        assert_eq!(&rest[6..8], &encode_header(2));
        assert_eq!(&rest[8..10], b"KL");
        assert_eq!(buf.space_used(), 0);
        assert_eq!(buf.get_data(&mut rest).unwrap(), 0);
    }

    #[test]
    fn wire_drain_rejects_tiny_output() {
        let mut buf = FramedBuffer::new(100, 1000, 10);
        buf.put_message(b"x").unwrap();
        let mut out = [0u8; 2];
        assert!(matches!(
            buf.get_data(&mut out),
            Err(FrameError::OutputTooSmall { min: 3 })
        ));
    }

    #[test]
    fn zero_length_keepalive_roundtrips() {
        let mut buf = FramedBuffer::new(100, 1000, 10);
        buf.put_message(b"").unwrap();
        let mut wire = [0u8; 8];
        assert_eq!(buf.get_data(&mut wire).unwrap(), 2);
        assert_eq!(&wire[..2], &[0, 0]);

        let mut back = FramedBuffer::new(100, 1000, 10);
        back.put_data(&wire[..2]);
        assert_eq!(back.message_count(), 1);
        let mut out = [0u8; 4];
        assert_eq!(back.get_message(&mut out).unwrap(), Some(0));
        assert_eq!(back.get_message(&mut out).unwrap(), None);
    }

    #[test]
    fn can_accept_tracks_all_three_caps() {
        let mut buf = FramedBuffer::new(10, 15, 2);
        assert!(buf.can_accept(10));
        assert!(!buf.can_accept(11));
        buf.put_message(b"12345678").unwrap();
        assert!(!buf.can_accept(8)); // byte budget
        assert!(buf.can_accept(7));
        buf.put_message(b"1234567").unwrap();
        assert!(!buf.can_accept(0)); // count cap
    }
}
