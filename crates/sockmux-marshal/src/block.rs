/// A cursor over a byte range: the wire buffer of the marshalling engine.
///
/// Reads and writes advance the cursor and may transfer fewer bytes than
/// requested when the end of the buffer is near. The EOF flag records that
/// a read found nothing, or that a bulk transfer was truncated; it is
/// cleared by [`seek`](Block::seek).
#[derive(Debug, Clone)]
pub struct Block {
    buf: Vec<u8>,
    pos: usize,
    at_eof: bool,
}

impl Block {
    /// A zero-filled block of `size` bytes, cursor at the start.
    pub fn with_capacity(size: usize) -> Self {
        Self {
            buf: vec![0u8; size],
            pos: 0,
            at_eof: false,
        }
    }

    /// Adopt existing bytes, cursor at the start.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self {
            buf,
            pos: 0,
            at_eof: false,
        }
    }

    /// Total size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Cursor offset from the start.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bytes between the cursor and the end.
    pub fn left(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Move the cursor to an absolute offset (clamped to the size) and
    /// clear the EOF flag.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
        self.at_eof = false;
    }

    /// Read up to `out.len()` bytes at the cursor, advancing it.
    /// Returns the bytes transferred; a read of zero bytes at the end of
    /// the buffer sets EOF.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut len = out.len();
        if self.left() < len {
            len = self.left();
            if len == 0 {
                self.at_eof = true;
            }
        }
        out[..len].copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len;
        len
    }

    /// Write up to `data.len()` bytes at the cursor, advancing it.
    /// Returns the bytes transferred; any truncation sets EOF.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let mut len = data.len();
        if self.left() < len {
            len = self.left();
            self.at_eof = true;
        }
        self.buf[self.pos..self.pos + len].copy_from_slice(&data[..len]);
        self.pos += len;
        len
    }

    /// The whole buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The bytes from the cursor to the end.
    pub fn cur(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Append another block's entire contents at this block's cursor.
    /// Truncation sets this block's EOF.
    pub fn append_from(&mut self, other: &Block) {
        self.write(other.as_slice());
    }

    /// Write this block's entire contents into another block at its
    /// cursor. Sets this block's EOF if the destination could not hold
    /// everything — even when some bytes were transferred, which differs
    /// from the partial-read semantics of [`read`](Block::read).
    pub fn extract_to(&mut self, other: &mut Block) {
        if other.write(&self.buf) < self.buf.len() {
            self.at_eof = true;
        }
    }

    /// Whether a read hit the end, or a bulk transfer was truncated.
    pub fn eof(&self) -> bool {
        self.at_eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_advances_and_reports_position() {
        let mut block = Block::with_capacity(10);
        assert_eq!(block.size(), 10);
        assert_eq!(block.write(b"abcd"), 4);
        assert_eq!(block.pos(), 4);
        assert_eq!(block.left(), 6);

        block.seek(0);
        let mut out = [0u8; 4];
        assert_eq!(block.read(&mut out), 4);
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn short_read_does_not_set_eof_until_empty() {
        let mut block = Block::from_vec(b"xy".to_vec());
        let mut out = [0u8; 8];
        assert_eq!(block.read(&mut out), 2);
        assert!(!block.eof());
        assert_eq!(block.read(&mut out), 0);
        assert!(block.eof());
    }

    #[test]
    fn truncated_write_sets_eof() {
        let mut block = Block::with_capacity(3);
        assert_eq!(block.write(b"abcdef"), 3);
        assert!(block.eof());
    }

    #[test]
    fn seek_clears_eof() {
        let mut block = Block::with_capacity(0);
        let mut out = [0u8; 1];
        block.read(&mut out);
        assert!(block.eof());
        block.seek(0);
        assert!(!block.eof());
    }

    #[test]
    fn bulk_append_and_extract() {
        let mut a = Block::with_capacity(8);
        let b = Block::from_vec(b"1234".to_vec());
        a.append_from(&b);
        assert_eq!(a.pos(), 4);
        assert!(!a.eof());

        let mut big = Block::from_vec(b"123456".to_vec());
        let mut small = Block::with_capacity(4);
        big.extract_to(&mut small);
        // Partially transferred, but the bulk operator still flags it.
        assert!(big.eof());
        assert_eq!(small.pos(), 4);
        assert_eq!(&small.as_slice()[..4], b"1234");
    }
}
