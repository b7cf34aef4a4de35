//! Scalar element codecs.
//!
//! Each codec knows how to marshal one constrained element kind into a
//! [`Block`] and back, how many wire bytes it can need at most, and its
//! default value. Running out of block space returns `Ok(None)` with the
//! cursor unmoved past the attempt; constraint violations are hard errors.

use crate::block::Block;
use crate::error::{MarshalError, Result};

/// Stores an integer from `[min, max]` biased to zero, big-endian, in the
/// minimum number of bytes that can represent `max - min`.
#[derive(Debug, Clone)]
pub(crate) struct IntCodec {
    min: i64,
    max: i64,
    bytes: usize,
}

impl IntCodec {
    pub(crate) fn new(min: i64, max: i64) -> Self {
        let span = if max > min { (max - min) as u64 } else { 0 };
        let mut bytes = 1usize;
        while bytes < 4 {
            if 1u64 << (bytes * 8) > span {
                break;
            }
            bytes += 1;
        }
        Self { min, max, bytes }
    }

    pub(crate) fn wire_bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn marshal(&self, value: i64, block: &mut Block) -> Result<Option<usize>> {
        if value < self.min || value > self.max {
            return Err(MarshalError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        if block.left() < self.bytes {
            return Ok(None);
        }
        let biased = (value - self.min) as u64;
        let be = biased.to_be_bytes();
        block.write(&be[8 - self.bytes..]);
        Ok(Some(self.bytes))
    }

    pub(crate) fn demarshal(&self, block: &mut Block) -> Result<Option<i64>> {
        if block.left() < self.bytes {
            return Ok(None);
        }
        let mut be = [0u8; 8];
        block.read(&mut be[8 - self.bytes..]);
        let value = u64::from_be_bytes(be) as i64 + self.min;
        if value < self.min || value > self.max {
            return Err(MarshalError::OutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        Ok(Some(value))
    }
}

/// Stores an unsigned integer of a declared bit width, big-endian.
#[derive(Debug, Clone)]
pub(crate) struct UintCodec {
    bits: u32,
    bytes: usize,
}

impl UintCodec {
    /// Codec for a 32-bit field; the wire width is capped at 4 bytes.
    pub(crate) fn for_u32(bits: u32) -> Result<Self> {
        if bits == 0 || bits > 32 {
            return Err(MarshalError::InvalidBits { bits });
        }
        Ok(Self {
            bits,
            bytes: (bits as usize).div_ceil(8),
        })
    }

    /// Codec for a 64-bit field, up to 8 wire bytes.
    pub(crate) fn for_u64(bits: u32) -> Result<Self> {
        if bits == 0 || bits > 64 {
            return Err(MarshalError::InvalidBits { bits });
        }
        Ok(Self {
            bits,
            bytes: (bits as usize).div_ceil(8),
        })
    }

    pub(crate) fn wire_bytes(&self) -> usize {
        self.bytes
    }

    fn limit(&self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bits) - 1
        }
    }

    pub(crate) fn marshal(&self, value: u64, block: &mut Block) -> Result<Option<usize>> {
        if value > self.limit() {
            return Err(MarshalError::BitsExceeded {
                value,
                bits: self.bits,
            });
        }
        if block.left() < self.bytes {
            return Ok(None);
        }
        let be = value.to_be_bytes();
        block.write(&be[8 - self.bytes..]);
        Ok(Some(self.bytes))
    }

    pub(crate) fn demarshal(&self, block: &mut Block) -> Result<Option<u64>> {
        if block.left() < self.bytes {
            return Ok(None);
        }
        let mut be = [0u8; 8];
        block.read(&mut be[8 - self.bytes..]);
        let value = u64::from_be_bytes(be);
        if value > self.limit() {
            return Err(MarshalError::BitsExceeded {
                value,
                bits: self.bits,
            });
        }
        Ok(Some(value))
    }
}

/// Quantizes a bounded float to `int((v - min) / prec)` and stores that
/// through an [`IntCodec`]. Round-trip error is bounded by `prec`.
#[derive(Debug, Clone)]
pub(crate) struct FloatCodec {
    min: f32,
    max: f32,
    prec: f32,
    quant: IntCodec,
}

impl FloatCodec {
    pub(crate) fn new(min: f32, max: f32, prec: f32) -> Result<Self> {
        let steps = (f64::from(max - min) / f64::from(prec)).ceil() + 1.0;
        if !(steps > 0.0) || steps > f64::from(i32::MAX) {
            return Err(MarshalError::RangeTooWide { min, max, prec });
        }
        Ok(Self {
            min,
            max,
            prec,
            quant: IntCodec::new(0, steps as i64),
        })
    }

    pub(crate) fn wire_bytes(&self) -> usize {
        self.quant.wire_bytes()
    }

    pub(crate) fn marshal(&self, value: f32, block: &mut Block) -> Result<Option<usize>> {
        if value < self.min || value > self.max || value.is_nan() {
            return Err(MarshalError::FloatOutOfRange {
                value,
                min: self.min,
                max: self.max,
            });
        }
        let quantized = ((f64::from(value) - f64::from(self.min)) / f64::from(self.prec)) as i64;
        self.quant.marshal(quantized, block)
    }

    pub(crate) fn demarshal(&self, block: &mut Block) -> Result<Option<f32>> {
        match self.quant.demarshal(block)? {
            Some(quantized) => Ok(Some(
                (quantized as f64 * f64::from(self.prec) + f64::from(self.min)) as f32,
            )),
            None => Ok(None),
        }
    }
}

/// Raw 64-bit float, bit-for-bit through the unsigned path.
#[derive(Debug, Clone)]
pub(crate) struct DoubleCodec;

impl DoubleCodec {
    pub(crate) fn wire_bytes(&self) -> usize {
        8
    }

    pub(crate) fn marshal(&self, value: f64, block: &mut Block) -> Result<Option<usize>> {
        if block.left() < 8 {
            return Ok(None);
        }
        block.write(&value.to_bits().to_be_bytes());
        Ok(Some(8))
    }

    pub(crate) fn demarshal(&self, block: &mut Block) -> Result<Option<f64>> {
        if block.left() < 8 {
            return Ok(None);
        }
        let mut be = [0u8; 8];
        block.read(&mut be);
        Ok(Some(f64::from_bits(u64::from_be_bytes(be))))
    }
}

/// Single byte, 0 or 1.
#[derive(Debug, Clone)]
pub(crate) struct BoolCodec;

impl BoolCodec {
    pub(crate) fn wire_bytes(&self) -> usize {
        1
    }

    pub(crate) fn marshal(&self, value: bool, block: &mut Block) -> Result<Option<usize>> {
        if block.left() < 1 {
            return Ok(None);
        }
        block.write(&[u8::from(value)]);
        Ok(Some(1))
    }

    pub(crate) fn demarshal(&self, block: &mut Block) -> Result<Option<bool>> {
        let mut byte = [0u8; 1];
        if block.read(&mut byte) < 1 {
            return Ok(None);
        }
        Ok(Some(byte[0] != 0))
    }
}

/// Length-prefixed string: an [`IntCodec`] length in `[0, max_len]`
/// followed by that many raw bytes.
#[derive(Debug, Clone)]
pub(crate) struct StrCodec {
    max_len: usize,
    len_codec: IntCodec,
}

impl StrCodec {
    pub(crate) fn new(max_len: usize) -> Self {
        Self {
            max_len,
            len_codec: IntCodec::new(0, max_len as i64),
        }
    }

    pub(crate) fn wire_bytes(&self) -> usize {
        self.len_codec.wire_bytes() + self.max_len
    }

    pub(crate) fn marshal(&self, value: &str, block: &mut Block) -> Result<Option<usize>> {
        let len = value.len();
        if len > self.max_len {
            return Err(MarshalError::StringTooLong {
                len,
                max: self.max_len,
            });
        }
        if block.left() < self.len_codec.wire_bytes() + len {
            return Ok(None);
        }
        self.len_codec.marshal(len as i64, block)?;
        block.write(value.as_bytes());
        Ok(Some(self.len_codec.wire_bytes() + len))
    }

    pub(crate) fn demarshal(&self, block: &mut Block) -> Result<Option<String>> {
        let start = block.pos();
        let len = match self.len_codec.demarshal(block)? {
            Some(len) => len as usize,
            None => return Ok(None),
        };
        if block.left() < len {
            block.seek(start);
            return Ok(None);
        }
        let mut bytes = vec![0u8; len];
        block.read(&mut bytes);
        match String::from_utf8(bytes) {
            Ok(string) => Ok(Some(string)),
            Err(_) => Err(MarshalError::InvalidString),
        }
    }
}
